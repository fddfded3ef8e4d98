use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::aio::session::Session;
use crate::cert::{Peer, PeerCertificate, Verification};
use crate::error::{Error, Result};
use crate::proto::{self, LineOutcome, MAX_URL_LEN};
use crate::status::Status;
use crate::tls::TlsConfig;
use crate::url::GeminiUrl;
use crate::HandlerResult;

/// Future returned by a request handler. Handlers borrow the request for
/// the duration of the response, so the future is boxed with the borrow's
/// lifetime:
///
/// ```ignore
/// fn hello(req: &mut Request) -> HandlerFuture<'_> {
///     Box::pin(async move { req.respond(Status::Success, "text/gemini", Some(b"hi\n")).await?; Ok(()) })
/// }
/// ```
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// How long a client gets to finish the handshake and deliver its request
/// line before the connection is dropped.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cooperative Gemini server: an accept loop spawning one task per
/// connection. Correct under a current-thread runtime; cancellation drops
/// the task's session, which closes the socket.
pub struct Server {
    config: Arc<TlsConfig>,
    reuse_addr: bool,
    reuse_port: bool,
    request_timeout: Duration,
}

impl Server {
    pub fn new(config: Arc<TlsConfig>) -> Server {
        Server {
            config,
            reuse_addr: true,
            reuse_port: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
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

    pub fn request_timeout(mut self, request_timeout: Duration) -> Server {
        self.request_timeout = request_timeout;
        self
    }

    /// Bind the listening socket without entering the accept loop.
    pub fn bind(&self, port: u16, bind_addr: Option<IpAddr>) -> Result<BoundServer> {
        let ip = bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(self.reuse_addr)?;
        #[cfg(unix)]
        if self.reuse_port {
            socket.set_reuseport(true)?;
        }
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        info!("gemini server listening on {}", listener.local_addr()?);
        Ok(BoundServer {
            listener,
            config: self.config.clone(),
            request_timeout: self.request_timeout,
        })
    }

    /// Bind and run.
    pub async fn serve<H>(&self, port: u16, handler: H, bind_addr: Option<IpAddr>) -> Result<()>
    where
        H: for<'a> Fn(&'a mut Request) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.bind(port, bind_addr)?.run(handler).await
    }
}

/// A server with its listening socket already bound.
pub struct BoundServer {
    listener: TcpListener,
    config: Arc<TlsConfig>,
    request_timeout: Duration,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever; one spawned task per connection.
    pub async fn run<H>(self, handler: H) -> Result<()>
    where
        H: for<'a> Fn(&'a mut Request) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let (tcp, _addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
            };
            let config = self.config.clone();
            let handler = handler.clone();
            let request_timeout = self.request_timeout;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(&config, tcp, &*handler, request_timeout).await {
                    error!("connection handling error: {e}");
                }
            });
        }
    }
}

async fn handle_connection<H>(
    config: &TlsConfig,
    tcp: TcpStream,
    handler: &H,
    request_timeout: Duration,
) -> Result<()>
where
    H: for<'a> Fn(&'a mut Request) -> HandlerFuture<'a>,
{
    let started = Instant::now();
    let ip = tcp.peer_addr()?.ip();

    let setup = async {
        let mut session = Session::accept(config, tcp).await?;
        let line = session.read_line_raw(MAX_URL_LEN).await?;
        Ok::<_, Error>((session, line))
    };
    let (mut session, line) = match timeout(request_timeout, setup).await {
        Ok(done) => done?,
        Err(_) => {
            return Err(Error::TlsIo(
                "client timed out before sending a request".to_string(),
            ))
        }
    };
    let id = session.id().to_string();

    let line = match line {
        LineOutcome::Eof => {
            session.close().await;
            return Ok(());
        }
        LineOutcome::Overflow => {
            let _ = session
                .send(&proto::build_response_header(
                    Status::BadRequest,
                    "Request URL too long",
                ))
                .await;
            session.close().await;
            return Ok(());
        }
        LineOutcome::Line(line) => line,
    };
    if line.is_empty() {
        session.close().await;
        return Ok(());
    }

    let url = String::from_utf8(line)
        .map_err(|_| ())
        .and_then(|raw| GeminiUrl::parse(&raw).map_err(|_| ()))
        .and_then(|url| url.expect_gemini().map(|_| url).map_err(|_| ()));
    let url = match url {
        Ok(url) => url,
        Err(()) => {
            let _ = session
                .send(&proto::build_response_header(
                    Status::BadRequest,
                    "Malformed request",
                ))
                .await;
            session.close().await;
            return Ok(());
        }
    };

    let peer = session.peer().clone();
    info!("{} {} request {}", id, ip, url);

    let mut request = Request { url, peer, session };
    if let Err(e) = handler(&mut request).await {
        error!("{} handler error: {e}", id);
        // Best effort; the handler may already have written a header.
        let _ = request.session.send(b"50 INTERNAL SERVER ERROR\r\n").await;
    }
    request.session.close().await;

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
    pub async fn respond(
        &mut self,
        status: Status,
        meta: &str,
        body: Option<&[u8]>,
    ) -> Result<()> {
        self.session
            .send(&proto::build_response_header(status, meta))
            .await?;
        if status.is_success() {
            if let Some(body) = body {
                if !body.is_empty() {
                    self.session.send(body).await?;
                }
            }
        }
        Ok(())
    }
}
