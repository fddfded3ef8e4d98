use std::io::ErrorKind;
use std::pin::Pin;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::cert::Peer;
use crate::error::{Error, Result};
use crate::proto::{LineBuffer, LineOutcome, MAX_RESPONSE_LINE, READ_CHUNK};
use crate::tls::TlsConfig;
use crate::url::GeminiUrl;

/// One TLS connection carrying one Gemini transaction, cooperative flavor.
///
/// The handshake and every read and write suspend the task whenever the
/// TLS engine reports WANT_READ or WANT_WRITE, so many sessions share one
/// thread. Dropping the session drops the socket; call
/// [`Session::close`] first when a close_notify is wanted.
pub struct Session {
    stream: SslStream<TcpStream>,
    line: LineBuffer,
    peer: Peer,
    id: String,
    open: bool,
}

impl Session {
    /// Dial `url` and complete a client handshake, with SNI for DNS names.
    pub async fn connect(config: &TlsConfig, url: &GeminiUrl) -> Result<Session> {
        let tcp = TcpStream::connect((url.raw_host(), url.effective_port())).await?;
        let mut ssl = config.new_session_state()?;
        if let Some(sni) = url.sni_hostname() {
            ssl.set_hostname(sni)
                .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        }
        let mut stream =
            SslStream::new(ssl, tcp).map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Ok(Session::after_handshake(stream))
    }

    /// Complete a server handshake on an accepted socket.
    pub async fn accept(config: &TlsConfig, tcp: TcpStream) -> Result<Session> {
        let ssl = config.new_session_state()?;
        let mut stream =
            SslStream::new(ssl, tcp).map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Pin::new(&mut stream)
            .accept()
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Ok(Session::after_handshake(stream))
    }

    fn after_handshake(stream: SslStream<TcpStream>) -> Session {
        let peer = Peer::from_ssl(stream.ssl());
        Session {
            stream,
            line: LineBuffer::new(),
            peer,
            id: nanoid::nanoid!(),
            open: true,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Write all of `data`.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| Error::TlsIo(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::TlsIo(e.to_string()))
    }

    /// Read into `out`, serving any bytes the line reader buffered past the
    /// header first. Returns 0 on close_notify or clean EOF.
    pub async fn recv(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let buffered = self.line.drain_into(out);
        if buffered > 0 {
            return Ok(buffered);
        }
        self.recv_tls(out).await
    }

    async fn recv_tls(&mut self, out: &mut [u8]) -> Result<usize> {
        match self.stream.read(out).await {
            Ok(n) => Ok(n),
            Err(ref e) if is_clean_eof(e) => Ok(0),
            Err(e) => Err(Error::TlsIo(e.to_string())),
        }
    }

    /// Read one line, buffered in large chunks; bytes past the LF stay
    /// buffered for [`Session::recv`].
    pub(crate) async fn read_line_raw(&mut self, max: usize) -> Result<LineOutcome> {
        loop {
            if let Some(line) = self.line.take_line() {
                return Ok(if line.len() > max {
                    LineOutcome::Overflow
                } else {
                    LineOutcome::Line(line)
                });
            }
            if self.line.buffered_len() > max + 1 {
                return Ok(LineOutcome::Overflow);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.recv_tls(&mut chunk).await?;
            if n == 0 {
                return Ok(if self.line.buffered_len() == 0 {
                    LineOutcome::Eof
                } else {
                    LineOutcome::Line(self.line.take_rest())
                });
            }
            self.line.push(&chunk[..n]);
        }
    }

    /// Line-oriented read for callers outside the transaction machinery.
    /// `None` means the stream closed with nothing buffered.
    pub async fn recv_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_line_raw(MAX_RESPONSE_LINE).await? {
            LineOutcome::Line(line) => Ok(Some(line)),
            LineOutcome::Eof => Ok(None),
            LineOutcome::Overflow => Err(Error::MalformedResponse(
                "header line too long".to_string(),
            )),
        }
    }

    /// Send close_notify and close the socket. Safe to call more than
    /// once; dropping the session closes the socket without the notify.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!("session {}: close_notify not sent: {}", self.id, e);
        }
    }
}

fn is_clean_eof(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    )
}
