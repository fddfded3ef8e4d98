//! Gemini protocol client and server.
//!
//! Gemini is a line-oriented, TLS-mandatory protocol carrying exactly one
//! transaction per connection: the request is an absolute URL, the
//! response a two-digit status, a meta string and, on success, a body
//! framed by the connection closing.
//!
//! The same protocol core is exposed under two execution modes:
//!
//! * [`blocking`]: the client runs on the caller's thread, the server
//!   gives every connection its own thread.
//! * [`aio`]: tokio tasks that suspend at every I/O point; fine on a
//!   current-thread runtime.
//!
//! Certificate verification never fails a handshake. Self-signed
//! certificates are everyday Gemini practice, so the verdict is recorded
//! per session and surfaced through [`Peer`], whose
//! fingerprint/self-signed/verified predicates are what a
//! trust-on-first-use store consumes. Persisting fingerprints is the
//! caller's business.
//!
//! ```no_run
//! let client = alhena::blocking::Client::new()?;
//! let mut response = client.request("gemini://example.org/")?;
//! if response.status() == alhena::Status::Success {
//!     let body = response.body()?;
//!     println!("{}", String::from_utf8_lossy(&body));
//! }
//! # Ok::<(), alhena::Error>(())
//! ```

pub mod aio;
pub mod blocking;
mod cert;
mod error;
mod proto;
mod status;
mod tls;
mod url;

pub use cert::{Peer, PeerCertificate, Verification};
pub use error::{Error, Result};
pub use proto::{MAX_META_LEN, MAX_URL_LEN};
pub use status::Status;
pub use tls::{ClientIdentity, Role, TlsConfig};
pub use url::{GeminiUrl, DEFAULT_PORT};

/// Error type request handlers may return; anything printable works.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a request handler resolves to. An `Err` makes the server answer
/// with a generic 50 if the connection still accepts one.
pub type HandlerResult = std::result::Result<(), HandlerError>;
