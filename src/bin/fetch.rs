use std::env;
use std::io::Write;

use anyhow::{anyhow, Context, Result};
use log::{error, info};

use alhena::blocking::Client;
use alhena::ClientIdentity;

#[derive(Debug)]
struct EnvConfig {
    max_redirects: Option<u32>,
    identity: Option<ClientIdentity>,
}

impl EnvConfig {
    fn from_env() -> Result<Self> {
        let max_redirects = match env::var("ALHENA_MAX_REDIRECTS") {
            Ok(value) => Some(
                value
                    .parse::<u32>()
                    .context("ALHENA_MAX_REDIRECTS must be an integer")?,
            ),
            Err(_) => None,
        };
        let identity = match (
            env::var("ALHENA_CLIENT_CERT_FILE"),
            env::var("ALHENA_CLIENT_KEY_FILE"),
        ) {
            (Ok(cert), Ok(key)) => Some(ClientIdentity::new(cert, key)),
            (Err(_), Err(_)) => None,
            _ => {
                return Err(anyhow!(
                    "ALHENA_CLIENT_CERT_FILE and ALHENA_CLIENT_KEY_FILE must be set together"
                ))
            }
        };
        Ok(Self {
            max_redirects,
            identity,
        })
    }
}

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    env_logger::init();
    let url = match env::args().nth(1) {
        Some(url) => url,
        None => {
            eprintln!("usage: alhena-fetch <url>");
            return 2;
        }
    };
    match fetch(&url) {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

fn fetch(url: &str) -> Result<()> {
    let env_config = EnvConfig::from_env()?;
    // Bare hostnames are common at the prompt; default them to gemini://.
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("gemini://{}", url)
    };

    let mut client = match &env_config.identity {
        Some(identity) => Client::with_identity(identity),
        None => Client::new(),
    }
    .context("TLS setup failed")?;
    if let Some(max_redirects) = env_config.max_redirects {
        client = client.max_redirects(max_redirects);
    }

    let mut response = client.request(&url).context("request failed")?;
    if let Some(cert) = response.certificate() {
        info!(
            "server cert {} ({})",
            cert.fingerprint().context("fingerprint failed")?,
            if response.peer().is_verified() {
                "chain verified"
            } else if response.peer().is_self_signed() {
                "self-signed"
            } else {
                response.verification().message()
            }
        );
    }

    eprintln!("{} {}", response.status().code(), response.meta());
    let body = response.body().context("body read failed")?;
    std::io::stdout()
        .write_all(&body)
        .context("writing body to stdout failed")?;
    Ok(())
}
