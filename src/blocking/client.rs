use std::sync::Arc;

use log::debug;

use crate::blocking::session::Session;
use crate::cert::{Peer, PeerCertificate, Verification};
use crate::error::{Error, Result};
use crate::proto::{self, LineOutcome, BODY_CHUNK, MAX_RESPONSE_LINE};
use crate::status::Status;
use crate::tls::{ClientIdentity, TlsConfig};
use crate::url::GeminiUrl;

/// Redirect hops allowed unless the caller says otherwise.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Blocking Gemini client. One connection per request, no pooling; the
/// shared TLS configuration is reused across requests and is safe to share
/// with other clients.
pub struct Client {
    config: Arc<TlsConfig>,
    max_redirects: u32,
}

impl Client {
    /// Client with a fresh anonymous configuration.
    pub fn new() -> Result<Client> {
        Ok(Client::with_config(Arc::new(TlsConfig::client(None)?)))
    }

    /// Client presenting the given certificate when a capsule asks.
    pub fn with_identity(identity: &ClientIdentity) -> Result<Client> {
        Ok(Client::with_config(Arc::new(TlsConfig::client(Some(
            identity,
        ))?)))
    }

    pub fn with_config(config: Arc<TlsConfig>) -> Client {
        Client {
            config,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Client {
        self.max_redirects = max_redirects;
        self
    }

    /// Perform one transaction, following redirects up to the configured
    /// bound. The caller's URL is sent verbatim on the first hop.
    pub fn request(&self, url_str: &str) -> Result<Response> {
        let mut current = GeminiUrl::parse(url_str)?;
        current.expect_gemini()?;
        let mut request_target = url_str.to_string();
        let mut remaining = self.max_redirects;

        loop {
            let mut session = Session::connect(&self.config, &current)?;
            debug!("connected to {}", current);

            let outcome = (|| {
                session.send(&proto::build_request_line(&request_target)?)?;
                session.read_line_raw(MAX_RESPONSE_LINE)
            })();
            let header = match outcome {
                Ok(LineOutcome::Line(line)) => line,
                Ok(LineOutcome::Eof) => {
                    session.close();
                    return Err(Error::MalformedResponse(
                        "connection closed before a header arrived".to_string(),
                    ));
                }
                Ok(LineOutcome::Overflow) => {
                    session.close();
                    return Err(Error::MalformedResponse(
                        "header line too long".to_string(),
                    ));
                }
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            };

            let (status, meta) = match proto::parse_response_header(&header) {
                Ok(parsed) => parsed,
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            };
            debug!("{} -> {} {}", current, status, meta);

            if status.is_redirect() {
                session.close();
                if remaining == 0 {
                    return Err(Error::TooManyRedirects(self.max_redirects));
                }
                remaining -= 1;
                let next = current.combine(&meta)?;
                next.expect_gemini()?;
                request_target = next.to_string();
                current = next;
                continue;
            }

            let peer = session.peer().clone();
            if status.code() >= 30 {
                // Failure classes carry no body.
                session.close();
                return Ok(Response {
                    status,
                    meta,
                    peer,
                    session: None,
                });
            }
            return Ok(Response {
                status,
                meta,
                peer,
                session: Some(session),
            });
        }
    }
}

/// Outcome of a transaction. Owns its session until the body is drained or
/// [`Response::close`] is called; dropping it releases the connection.
pub struct Response {
    status: Status,
    meta: String,
    peer: Peer,
    session: Option<Session>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("meta", &self.meta)
            .field("peer", &self.peer)
            .field("session", &self.session.is_some())
            .finish()
    }
}

impl Response {
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn meta(&self) -> &str {
        &self.meta
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn certificate(&self) -> Option<&PeerCertificate> {
        self.peer.certificate()
    }

    pub fn verification(&self) -> Verification {
        self.peer.verification()
    }

    /// Drain the body until the peer closes. Only a success response reads
    /// from the network; everything else returns empty without touching
    /// it. The session is closed on completion and on error alike.
    pub fn body(&mut self) -> Result<Vec<u8>> {
        let Some(mut session) = self.session.take() else {
            return Ok(Vec::new());
        };
        if self.status != Status::Success {
            session.close();
            return Ok(Vec::new());
        }
        let mut body = Vec::new();
        let mut chunk = [0u8; BODY_CHUNK];
        loop {
            match session.recv(&mut chunk) {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            }
        }
        session.close();
        Ok(body)
    }

    /// Release the connection without reading a body.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}
