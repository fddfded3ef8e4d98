use std::env;
use std::fmt::Write;
use std::net::IpAddr;

use anyhow::{Context, Result};
use log::error;

use alhena::blocking::{Request, Server};
use alhena::{HandlerResult, Status, TlsConfig, DEFAULT_PORT};

#[derive(Debug)]
struct EnvConfig {
    cert_file: String,
    key_file: String,
    bind_addr: Option<IpAddr>,
    port: u16,
}

impl EnvConfig {
    fn from_env() -> Result<Self> {
        let cert_file = env::var("ALHENA_TLS_CERT_FILE")
            .context("Missing environment variable ALHENA_TLS_CERT_FILE")?;
        let key_file = env::var("ALHENA_TLS_KEY_FILE")
            .context("Missing environment variable ALHENA_TLS_KEY_FILE")?;
        let bind_addr = match env::var("ALHENA_BIND") {
            Ok(value) => Some(value.parse().context("ALHENA_BIND must be an IP literal")?),
            Err(_) => None,
        };
        let port = match env::var("ALHENA_PORT") {
            Ok(value) => value.parse().context("ALHENA_PORT must be a port number")?,
            Err(_) => DEFAULT_PORT,
        };
        Ok(Self {
            cert_file,
            key_file,
            bind_addr,
            port,
        })
    }
}

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    env_logger::init();
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };
    if let Err(e) = serve(&env_config) {
        error!("{:#}", e);
        return 1;
    }
    0
}

fn serve(env_config: &EnvConfig) -> Result<()> {
    let config = TlsConfig::server(&env_config.cert_file, &env_config.key_file, None)
        .context("TLS setup failed")?;
    Server::new(config.into())
        .serve(env_config.port, introspect, env_config.bind_addr)
        .context("server failed")?;
    Ok(())
}

/// Answers every request with a page describing what the server saw,
/// which is the quickest way to watch the client-certificate exposure at
/// work from the other end of a connection.
fn introspect(req: &mut Request) -> HandlerResult {
    let mut page = String::new();
    writeln!(page, "# alhena-serve")?;
    writeln!(page, "Requested URL: {}", req.url())?;
    writeln!(page, "Decoded path: {}", req.url().decoded_path())?;
    if let Some(query) = req.url().query() {
        writeln!(page, "Query: {}", query)?;
    }
    match req.certificate() {
        None => writeln!(page, "No client certificate presented.")?,
        Some(cert) => {
            writeln!(
                page,
                "Client certificate CN: {}",
                cert.common_name().unwrap_or_else(|| "(none)".to_string())
            )?;
            writeln!(page, "Fingerprint: {}", cert.fingerprint()?)?;
            let peer = req.peer();
            let verdict = if peer.is_verified() {
                "chain verified".to_string()
            } else if peer.is_self_signed() {
                "self-signed".to_string()
            } else {
                peer.verification().message().to_string()
            };
            writeln!(page, "Verification: {}", verdict)?;
        }
    }
    req.respond(Status::Success, "text/gemini", Some(page.as_bytes()))?;
    Ok(())
}
