use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{error, info};
use socket2::{Domain, Protocol, Socket, Type};

use crate::blocking::session::Session;
use crate::cert::{Peer, PeerCertificate, Verification};
use crate::error::Result;
use crate::proto::{self, LineOutcome, MAX_URL_LEN};
use crate::status::Status;
use crate::tls::TlsConfig;
use crate::url::GeminiUrl;
use crate::HandlerResult;

/// Blocking Gemini server: an unbounded accept loop handing every
/// connection to its own thread. One transaction per connection, no
/// keep-alive.
pub struct Server {
    config: Arc<TlsConfig>,
    reuse_addr: bool,
    reuse_port: bool,
}

impl Server {
    pub fn new(config: Arc<TlsConfig>) -> Server {
        Server {
            config,
            reuse_addr: true,
            reuse_port: false,
        }
    }

    pub fn reuse_addr(mut self, on: bool) -> Server {
        self.reuse_addr = on;
        self
    }

    pub fn reuse_port(mut self, on: bool) -> Server {
        self.reuse_port = on;
        self
    }

    /// Bind the listening socket without entering the accept loop, so the
    /// caller can learn the bound address first.
    pub fn bind(&self, port: u16, bind_addr: Option<IpAddr>) -> Result<BoundServer> {
        let ip = bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, port);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(self.reuse_addr)?;
        #[cfg(unix)]
        if self.reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();
        info!("gemini server listening on {}", listener.local_addr()?);
        Ok(BoundServer {
            listener,
            config: self.config.clone(),
        })
    }

    /// Bind and run. Port 0 asks the OS for an ephemeral port; use
    /// [`Server::bind`] when the chosen port matters to the caller.
    pub fn serve<H>(&self, port: u16, handler: H, bind_addr: Option<IpAddr>) -> Result<()>
    where
        H: Fn(&mut Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.bind(port, bind_addr)?.run(handler)
    }
}

/// A server with its listening socket already bound.
pub struct BoundServer {
    listener: TcpListener,
    config: Arc<TlsConfig>,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever. Each connection runs on its own thread; a failing
    /// connection is logged and never takes the loop down.
    pub fn run<H>(self, handler: H) -> Result<()>
    where
        H: Fn(&mut Request) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for stream in self.listener.incoming() {
            match stream {
                Err(e) => error!("failed to accept connection: {e}"),
                Ok(tcp) => {
                    let config = self.config.clone();
                    let handler = handler.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&config, tcp, &*handler) {
                            error!("connection handling error: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

fn handle_connection<H>(config: &TlsConfig, tcp: TcpStream, handler: &H) -> Result<()>
where
    H: Fn(&mut Request) -> HandlerResult,
{
    let started = Instant::now();
    let ip = tcp.peer_addr()?.ip();
    let mut session = Session::accept(config, tcp)?;
    let id = session.id().to_string();

    let line = match session.read_line_raw(MAX_URL_LEN)? {
        LineOutcome::Eof => {
            session.close();
            return Ok(());
        }
        LineOutcome::Overflow => {
            let _ = session.send(&proto::build_response_header(
                Status::BadRequest,
                "Request URL too long",
            ));
            session.close();
            return Ok(());
        }
        LineOutcome::Line(line) => line,
    };
    if line.is_empty() {
        session.close();
        return Ok(());
    }

    let url = String::from_utf8(line)
        .map_err(|_| ())
        .and_then(|raw| GeminiUrl::parse(&raw).map_err(|_| ()))
        .and_then(|url| url.expect_gemini().map(|_| url).map_err(|_| ()));
    let url = match url {
        Ok(url) => url,
        Err(()) => {
            let _ = session.send(&proto::build_response_header(
                Status::BadRequest,
                "Malformed request",
            ));
            session.close();
            return Ok(());
        }
    };

    let peer = session.peer().clone();
    info!(
        "{} {} request {}{}",
        id,
        ip,
        url,
        match peer.certificate().and_then(|c| c.fingerprint().ok()) {
            Some(fp) => format!(" client cert {fp}"),
            None => String::new(),
        }
    );

    let mut request = Request { url, peer, session };
    if let Err(e) = handler(&mut request) {
        error!("{} handler error: {e}", id);
        // Best effort; the handler may already have written a header.
        let _ = request.session.send(b"50 INTERNAL SERVER ERROR\r\n");
    }
    request.session.close();

    info!("{} {} finished ({}ms)", id, ip, started.elapsed().as_millis());
    Ok(())
}

/// One accepted transaction, handed to the request handler.
pub struct Request {
    url: GeminiUrl,
    peer: Peer,
    session: Session,
}

impl Request {
    pub fn url(&self) -> &GeminiUrl {
        &self.url
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

    /// Write the response line and, for a success status, the body bytes.
    /// A write failure means the connection is lost; there is no retry.
    pub fn respond(&mut self, status: Status, meta: &str, body: Option<&[u8]>) -> Result<()> {
        self.session
            .send(&proto::build_response_header(status, meta))?;
        if status.is_success() {
            if let Some(body) = body {
                if !body.is_empty() {
                    self.session.send(body)?;
                }
            }
        }
        Ok(())
    }
}
