//! Wire-level framing shared by both execution modes: the request line,
//! the response header, and the buffered line reader whose tail feeds the
//! body stream.

use crate::error::{Error, Result};
use crate::status::Status;

/// Longest request URL the protocol admits, excluding the CRLF.
pub const MAX_URL_LEN: usize = 1024;
/// Longest response meta the protocol admits.
pub const MAX_META_LEN: usize = 1024;
/// Longest response header line excluding the CRLF: two digits, a space,
/// the meta.
pub(crate) const MAX_RESPONSE_LINE: usize = 2 + 1 + MAX_META_LEN;
/// Granularity of buffered line reads.
pub(crate) const READ_CHUNK: usize = 4096;
/// Granularity of body reads.
pub(crate) const BODY_CHUNK: usize = 8192;

/// `<url> CR LF`, refusing URLs the far side is required to reject.
pub(crate) fn build_request_line(url: &str) -> Result<Vec<u8>> {
    if url.len() > MAX_URL_LEN {
        return Err(Error::InvalidUrl(format!(
            "request URL is {} bytes, limit is {}",
            url.len(),
            MAX_URL_LEN
        )));
    }
    let mut line = Vec::with_capacity(url.len() + 2);
    line.extend_from_slice(url.as_bytes());
    line.extend_from_slice(b"\r\n");
    Ok(line)
}

/// `<status> SP <meta> CR LF`. Meta longer than the wire allows is a bug
/// in the caller, not a runtime condition.
pub(crate) fn build_response_header(status: Status, meta: &str) -> Vec<u8> {
    assert!(
        meta.len() <= MAX_META_LEN,
        "response meta is {} bytes, limit is {}",
        meta.len(),
        MAX_META_LEN
    );
    format!("{} {}\r\n", status.code(), meta).into_bytes()
}

/// Parse a response header line (terminator already stripped): two ASCII
/// digits, a single space at offset 2, UTF-8 meta after it.
pub(crate) fn parse_response_header(line: &[u8]) -> Result<(Status, String)> {
    if line.len() < 3 {
        return Err(Error::MalformedResponse(format!(
            "header line is {} bytes, need at least 3",
            line.len()
        )));
    }
    if !line[0].is_ascii_digit() || !line[1].is_ascii_digit() {
        return Err(Error::MalformedResponse(
            "status is not two ASCII digits".to_string(),
        ));
    }
    if line[2] != b' ' {
        return Err(Error::MalformedResponse(
            "missing space after status".to_string(),
        ));
    }
    let code = (line[0] - b'0') * 10 + (line[1] - b'0');
    let meta = std::str::from_utf8(&line[3..])
        .map_err(|_| Error::MalformedResponse("meta is not valid UTF-8".to_string()))?;
    Ok((Status::from_code(code), meta.to_string()))
}

/// Outcome of one buffered line read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    /// A line, LF and optional preceding CR stripped. The stream may also
    /// end with an unterminated line, which is returned as-is.
    Line(Vec<u8>),
    /// The stream closed before any byte arrived.
    Eof,
    /// No terminator within the allowed length.
    Overflow,
}

/// Accumulates reads in large chunks and hands out one line at a time.
/// Bytes past the first LF stay buffered; the response body starts there.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer {
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Next complete line, if one is buffered.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let start = self.pos;
        let lf = self.buf[start..].iter().position(|&b| b == b'\n')?;
        let mut end = start + lf;
        self.pos = start + lf + 1;
        if end > start && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        Some(self.buf[start..end].to_vec())
    }

    /// Whatever is buffered, for a stream that ended mid-line.
    pub fn take_rest(&mut self) -> Vec<u8> {
        let rest = self.buf[self.pos..].to_vec();
        self.buf.clear();
        self.pos = 0;
        rest
    }

    /// Move up to `out.len()` buffered bytes into `out`; the body stream
    /// consumes the tail left behind by the header read.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.buffered_len().min(out.len());
        if n > 0 {
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_is_terminated() {
        let line = build_request_line("gemini://example.org/").unwrap();
        assert_eq!(line, b"gemini://example.org/\r\n");
    }

    #[test]
    fn request_line_enforces_url_limit() {
        let url = format!("gemini://example.org/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            build_request_line(&url),
            Err(Error::InvalidUrl(_))
        ));
        // Exactly at the limit is fine.
        let url = format!("gemini://h/{}", "a".repeat(MAX_URL_LEN - "gemini://h/".len()));
        assert_eq!(url.len(), MAX_URL_LEN);
        assert!(build_request_line(&url).is_ok());
    }

    #[test]
    fn response_header_format() {
        assert_eq!(
            build_response_header(Status::Success, "text/gemini"),
            b"20 text/gemini\r\n"
        );
        assert_eq!(
            build_response_header(Status::BadRequest, "nope"),
            b"59 nope\r\n"
        );
    }

    #[test]
    fn response_header_meta_at_limit_is_accepted() {
        let header = build_response_header(Status::Success, &"m".repeat(MAX_META_LEN));
        assert_eq!(header.len(), 3 + MAX_META_LEN + 2);
    }

    #[test]
    #[should_panic(expected = "limit is 1024")]
    fn response_header_meta_limit_is_asserted() {
        build_response_header(Status::Success, &"m".repeat(MAX_META_LEN + 1));
    }

    #[test]
    fn parse_header_success() {
        let (status, meta) = parse_response_header(b"20 text/gemini").unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(meta, "text/gemini");
    }

    #[test]
    fn parse_header_empty_meta() {
        let (status, meta) = parse_response_header(b"20 ").unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(meta, "");
    }

    #[test]
    fn parse_header_unknown_code_keeps_value() {
        let (status, _) = parse_response_header(b"21 odd").unwrap();
        assert_eq!(status, Status::Unknown(21));
        assert_eq!(status.code(), 21);
    }

    #[test]
    fn parse_header_rejections() {
        assert!(parse_response_header(b"").is_err());
        assert!(parse_response_header(b"20").is_err());
        assert!(parse_response_header(b"XX bad").is_err());
        assert!(parse_response_header(b"2  half").is_err());
        assert!(parse_response_header(b"20-text").is_err());
        assert!(parse_response_header(b"20 \xff\xfe").is_err());
    }

    #[test]
    fn line_buffer_strips_terminators() {
        let mut lb = LineBuffer::new();
        lb.push(b"20 text/gemini\r\nbody starts here");
        assert_eq!(lb.take_line().unwrap(), b"20 text/gemini");
        assert_eq!(lb.buffered_len(), "body starts here".len());
    }

    #[test]
    fn line_buffer_bare_lf() {
        let mut lb = LineBuffer::new();
        lb.push(b"hello\nrest");
        assert_eq!(lb.take_line().unwrap(), b"hello");
        assert_eq!(lb.take_rest(), b"rest");
    }

    #[test]
    fn line_buffer_across_pushes() {
        let mut lb = LineBuffer::new();
        lb.push(b"31 /ne");
        assert_eq!(lb.take_line(), None);
        lb.push(b"w\r\n");
        assert_eq!(lb.take_line().unwrap(), b"31 /new");
        assert_eq!(lb.buffered_len(), 0);
    }

    #[test]
    fn line_buffer_tail_feeds_body_reads() {
        let mut lb = LineBuffer::new();
        lb.push(b"20 ok\r\nabcdef");
        lb.take_line().unwrap();
        let mut out = [0u8; 4];
        assert_eq!(lb.drain_into(&mut out), 4);
        assert_eq!(&out, b"abcd");
        let mut out = [0u8; 4];
        assert_eq!(lb.drain_into(&mut out), 2);
        assert_eq!(&out[..2], b"ef");
        assert_eq!(lb.drain_into(&mut out), 0);
    }

    #[test]
    fn line_buffer_multiple_lines_stay_ordered() {
        let mut lb = LineBuffer::new();
        lb.push(b"one\r\ntwo\r\nthree");
        assert_eq!(lb.take_line().unwrap(), b"one");
        assert_eq!(lb.take_line().unwrap(), b"two");
        assert_eq!(lb.take_line(), None);
        assert_eq!(lb.take_rest(), b"three");
    }
}
