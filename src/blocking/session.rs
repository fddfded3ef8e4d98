use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};

use log::debug;
use openssl::ssl::{ErrorCode, SslStream};

use crate::cert::Peer;
use crate::error::{Error, Result};
use crate::proto::{LineBuffer, LineOutcome, MAX_RESPONSE_LINE, READ_CHUNK};
use crate::tls::TlsConfig;
use crate::url::GeminiUrl;

/// One TLS connection carrying one Gemini transaction, blocking flavor.
///
/// Owns its TLS state exclusively; the shared [`TlsConfig`] only supplies
/// the context it was derived from. Closing is idempotent and also happens
/// on drop, so the socket is released on every exit path.
pub struct Session {
    stream: SslStream<TcpStream>,
    line: LineBuffer,
    peer: Peer,
    id: String,
    open: bool,
}

impl Session {
    /// Dial `url` and complete a client handshake, with SNI for DNS names.
    pub fn connect(config: &TlsConfig, url: &GeminiUrl) -> Result<Session> {
        let tcp = TcpStream::connect((url.raw_host(), url.effective_port()))?;
        let mut ssl = config.new_session_state()?;
        if let Some(sni) = url.sni_hostname() {
            ssl.set_hostname(sni)
                .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        }
        let mut stream =
            SslStream::new(ssl, tcp).map_err(|e| Error::TlsHandshake(e.to_string()))?;
        stream
            .connect()
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Ok(Session::after_handshake(stream))
    }

    /// Complete a server handshake on an accepted socket.
    pub fn accept(config: &TlsConfig, tcp: TcpStream) -> Result<Session> {
        let ssl = config.new_session_state()?;
        let mut stream =
            SslStream::new(ssl, tcp).map_err(|e| Error::TlsHandshake(e.to_string()))?;
        stream
            .accept()
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

    /// What the handshake established about the other side.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Write all of `data`.
    pub fn send(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.stream.ssl_write(data) {
                Ok(n) => data = &data[n..],
                Err(ref e) if retryable(e) => continue,
                Err(e) => return Err(Error::TlsIo(e.to_string())),
            }
        }
        Ok(())
    }

    /// Read into `out`, serving any bytes the line reader buffered past the
    /// header first. Returns 0 on close_notify or clean EOF.
    pub fn recv(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let buffered = self.line.drain_into(out);
        if buffered > 0 {
            return Ok(buffered);
        }
        self.recv_tls(out)
    }

    fn recv_tls(&mut self, out: &mut [u8]) -> Result<usize> {
        loop {
            match self.stream.ssl_read(out) {
                Ok(n) => return Ok(n),
                Err(ref e) if retryable(e) => continue,
                Err(ref e) if is_clean_eof(e) => return Ok(0),
                Err(e) => return Err(Error::TlsIo(e.to_string())),
            }
        }
    }

    /// Read one line, buffered in large chunks. The LF and an optional
    /// preceding CR are stripped; bytes past the LF stay buffered for
    /// [`Session::recv`].
    pub(crate) fn read_line_raw(&mut self, max: usize) -> Result<LineOutcome> {
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
            let n = self.recv_tls(&mut chunk)?;
            if n == 0 {
                return Ok(if self.line.buffered_len() == 0 {
                    LineOutcome::Eof
                } else {
                    // Stream ended mid-line; hand back what arrived.
                    LineOutcome::Line(self.line.take_rest())
                });
            }
            self.line.push(&chunk[..n]);
        }
    }

    /// Line-oriented read for callers outside the transaction machinery.
    /// `None` means the stream closed with nothing buffered.
    pub fn recv_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_line_raw(MAX_RESPONSE_LINE)? {
            LineOutcome::Line(line) => Ok(Some(line)),
            LineOutcome::Eof => Ok(None),
            LineOutcome::Overflow => Err(Error::MalformedResponse(
                "header line too long".to_string(),
            )),
        }
    }

    /// Send close_notify if the TLS state is still live, then close the
    /// socket. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.stream.shutdown() {
            debug!("session {}: close_notify not sent: {}", self.id, e);
        }
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn retryable(e: &openssl::ssl::Error) -> bool {
    matches!(e.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE)
}

/// Peers that close without a proper close_notify are everywhere; treat
/// the usual abrupt-close shapes as end of stream rather than failures.
fn is_clean_eof(e: &openssl::ssl::Error) -> bool {
    match e.code() {
        ErrorCode::ZERO_RETURN => true,
        ErrorCode::SYSCALL => match e.io_error() {
            None => true,
            Some(io) => matches!(
                io.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionReset
            ),
        },
        _ => false,
    }
}
