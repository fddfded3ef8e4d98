use std::path::{Path, PathBuf};

use log::debug;
use openssl::rand::rand_bytes;
use openssl::ssl::{
    Ssl, SslAcceptor, SslConnector, SslContext, SslFiletype, SslMethod, SslVerifyMode, SslVersion,
};
use openssl::x509::X509StoreContextRef;

use crate::error::Result;

/// Which side of the handshake a configuration drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Certificate and key files presented by a client when a capsule asks for
/// one.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl ClientIdentity {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> ClientIdentity {
        ClientIdentity {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }
}

/// Shared TLS configuration for one role.
///
/// Built once, then shared by reference across every connection. Only
/// configuration lives here; each connection derives its own handshake
/// state through [`TlsConfig::new_session_state`], so concurrent sessions
/// never touch each other's TLS internals. The configuration must outlive
/// every session derived from it, which the `Arc` handed around by the
/// client and server types guarantees.
pub struct TlsConfig {
    context: SslContext,
    role: Role,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").field("role", &self.role).finish()
    }
}

impl TlsConfig {
    /// Client-side configuration. Verification runs against the system
    /// trust store and its verdict is recorded on every session, but it
    /// never aborts the handshake; self-signed capsules are the norm and
    /// trust decisions belong to the caller.
    pub fn client(identity: Option<&ClientIdentity>) -> Result<TlsConfig> {
        openssl::init();
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
        builder.set_verify_callback(SslVerifyMode::NONE, report_only_verify);
        if let Some(identity) = identity {
            builder.set_certificate_chain_file(&identity.cert_file)?;
            builder.set_private_key_file(&identity.key_file, SslFiletype::PEM)?;
            builder.check_private_key()?;
        }
        Ok(TlsConfig {
            context: builder.build().into_context(),
            role: Role::Client,
        })
    }

    /// Server-side configuration. The certificate chain and key are
    /// required. A client certificate is requested but never demanded;
    /// whatever the client presents is recorded for the request handler.
    pub fn server(
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        session_id: Option<&[u8]>,
    ) -> Result<TlsConfig> {
        openssl::init();
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
        builder.set_private_key_file(key_file.as_ref(), SslFiletype::PEM)?;
        builder.set_certificate_chain_file(cert_file.as_ref())?;
        builder.set_verify_callback(SslVerifyMode::PEER, report_only_verify);
        match session_id {
            Some(id) => builder.set_session_id_context(id)?,
            None => {
                let mut id = [0u8; 32];
                rand_bytes(&mut id)?;
                builder.set_session_id_context(&id)?;
            }
        }
        builder.check_private_key()?;
        Ok(TlsConfig {
            context: builder.build().into_context(),
            role: Role::Server,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Fresh per-connection TLS state. Every session gets its own; the
    /// shared context is never handed out mutably.
    pub(crate) fn new_session_state(&self) -> Result<Ssl> {
        Ok(Ssl::new(&self.context)?)
    }
}

/// Verify callback for both roles: record, never reject.
///
/// The verify result stays on the session for the caller's trust policy,
/// so a failed pre-verification must not tear down the handshake.
fn report_only_verify(preverify_ok: bool, ctx: &mut X509StoreContextRef) -> bool {
    if !preverify_ok {
        debug!(
            "certificate verification recorded {:?} at depth {}",
            ctx.error().error_string(),
            ctx.error_depth()
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn client_config_without_identity() {
        let config = TlsConfig::client(None).unwrap();
        assert_eq!(config.role(), Role::Client);
        // Two sessions from one config get independent state objects.
        let a = config.new_session_state().unwrap();
        let b = config.new_session_state().unwrap();
        let a_ref: &openssl::ssl::SslRef = &a;
        let b_ref: &openssl::ssl::SslRef = &b;
        assert!(!std::ptr::eq(a_ref, b_ref));
    }

    #[test]
    fn server_config_requires_real_files() {
        let err = TlsConfig::server("/nonexistent/cert.pem", "/nonexistent/key.pem", None)
            .expect_err("missing key material must fail");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn client_identity_with_missing_files_fails() {
        let identity = ClientIdentity::new("/nonexistent/id.pem", "/nonexistent/id.key");
        let err = TlsConfig::client(Some(&identity)).expect_err("missing identity must fail");
        assert!(matches!(err, Error::Configuration(_)));
    }
}
