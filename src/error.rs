use thiserror::Error;

/// Everything that can abort a Gemini transaction.
///
/// Certificate verification outcomes are deliberately absent: a peer with a
/// self-signed or otherwise unverifiable certificate still completes the
/// handshake, and the verdict is surfaced through [`crate::Peer`] instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(u32),

    #[error("malformed response header: {0}")]
    MalformedResponse(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("TLS I/O error: {0}")]
    TlsIo(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Configuration(#[from] openssl::error::ErrorStack),
}

pub type Result<T> = std::result::Result<T, Error>;
