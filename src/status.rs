use std::fmt;

/// Gemini response status codes, grouped by first digit.
///
/// Codes the protocol does not define are kept as [`Status::Unknown`] so the
/// wire value survives a round trip; they behave as a generic error
/// everywhere a classification is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 10: the meta line is a prompt for user input.
    Input,
    /// 11: input prompt, client should not echo (passwords).
    SensitiveInput,
    /// 20: success, meta is the MIME type of the body.
    Success,
    /// 30: temporary redirect, meta is the target URL.
    RedirectTemporary,
    /// 31: permanent redirect.
    RedirectPermanent,
    /// 40: unspecified temporary failure.
    TemporaryFailure,
    /// 41: server unavailable.
    ServerUnavailable,
    /// 42: CGI error.
    CgiError,
    /// 43: proxy error.
    ProxyError,
    /// 44: rate limiting, meta is the number of seconds to wait.
    SlowDown,
    /// 50: unspecified permanent failure.
    PermanentFailure,
    /// 51: not found.
    NotFound,
    /// 52: gone.
    Gone,
    /// 53: proxy request refused.
    ProxyRequestRefused,
    /// 59: the server could not parse the request.
    BadRequest,
    /// 60: a client certificate is required.
    ClientCertificateRequired,
    /// 61: the client certificate is not authorized for this resource.
    CertificateNotAuthorized,
    /// 62: the client certificate is not valid.
    CertificateNotValid,
    /// Anything else; the code is preserved for wire transmission.
    Unknown(u8),
}

impl Status {
    pub fn from_code(code: u8) -> Status {
        match code {
            10 => Status::Input,
            11 => Status::SensitiveInput,
            20 => Status::Success,
            30 => Status::RedirectTemporary,
            31 => Status::RedirectPermanent,
            40 => Status::TemporaryFailure,
            41 => Status::ServerUnavailable,
            42 => Status::CgiError,
            43 => Status::ProxyError,
            44 => Status::SlowDown,
            50 => Status::PermanentFailure,
            51 => Status::NotFound,
            52 => Status::Gone,
            53 => Status::ProxyRequestRefused,
            59 => Status::BadRequest,
            60 => Status::ClientCertificateRequired,
            61 => Status::CertificateNotAuthorized,
            62 => Status::CertificateNotValid,
            other => Status::Unknown(other),
        }
    }

    /// The two-digit wire value.
    pub fn code(self) -> u8 {
        match self {
            Status::Input => 10,
            Status::SensitiveInput => 11,
            Status::Success => 20,
            Status::RedirectTemporary => 30,
            Status::RedirectPermanent => 31,
            Status::TemporaryFailure => 40,
            Status::ServerUnavailable => 41,
            Status::CgiError => 42,
            Status::ProxyError => 43,
            Status::SlowDown => 44,
            Status::PermanentFailure => 50,
            Status::NotFound => 51,
            Status::Gone => 52,
            Status::ProxyRequestRefused => 53,
            Status::BadRequest => 59,
            Status::ClientCertificateRequired => 60,
            Status::CertificateNotAuthorized => 61,
            Status::CertificateNotValid => 62,
            Status::Unknown(code) => code,
        }
    }

    pub fn is_input(self) -> bool {
        matches!(self, Status::Input | Status::SensitiveInput)
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub fn is_redirect(self) -> bool {
        matches!(self, Status::RedirectTemporary | Status::RedirectPermanent)
    }

    pub fn is_temporary_failure(self) -> bool {
        matches!(
            self,
            Status::TemporaryFailure
                | Status::ServerUnavailable
                | Status::CgiError
                | Status::ProxyError
                | Status::SlowDown
        )
    }

    pub fn is_permanent_failure(self) -> bool {
        matches!(
            self,
            Status::PermanentFailure
                | Status::NotFound
                | Status::Gone
                | Status::ProxyRequestRefused
                | Status::BadRequest
        )
    }

    pub fn is_client_certificate(self) -> bool {
        matches!(
            self,
            Status::ClientCertificateRequired
                | Status::CertificateNotAuthorized
                | Status::CertificateNotValid
        )
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Status {
        Status::from_code(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
