//! Line- and dot-terminator-oriented I/O over one leg of a proxied SMTP
//! session. Hand-rolled rather than built on `rfc5321`'s client/parser
//! (which is pest-grammar driven and built for the SmtpClient's own
//! retry/pipelining concerns): the wrapper only needs to recognize a
//! command's leading verb well enough to special-case `DATA`/`STARTTLS`
//! and relay everything else verbatim, which a pest grammar would be
//! overkill for.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Bound on a single SMTP command line, guarding against a client that
/// never sends CRLF.
const MAX_LINE: usize = 64 * 1024;

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// One half-duplex leg of the proxy: a small pending-bytes buffer over a
/// boxed async stream, supporting CRLF line reads, dot-terminated body
/// reads (with dot-unstuffing), and verbatim writes.
pub struct SmtpIo {
    stream: Box<dyn Stream>,
    buf: Vec<u8>,
    io_timeout: Duration,
}

impl SmtpIo {
    pub fn new(stream: Box<dyn Stream>, io_timeout: Duration) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            io_timeout,
        }
    }

    /// Replaces the underlying stream (used after a STARTTLS upgrade).
    /// Any bytes pipelined past the command that triggered the upgrade
    /// are discarded, matching the common assumption that a well-behaved
    /// client does not pipeline through STARTTLS.
    pub fn replace_stream(&mut self, stream: Box<dyn Stream>) {
        self.stream = stream;
        self.buf.clear();
    }

    /// Takes the underlying stream out, leaving an inert placeholder
    /// behind. Used to hand the raw plaintext stream to a TLS
    /// acceptor/connector mid-upgrade; the caller must follow up with
    /// [`Self::replace_stream`] once the handshake completes.
    pub fn take_inner(&mut self) -> Box<dyn Stream> {
        std::mem::replace(&mut self.stream, Box::new(io::Cursor::new(Vec::new())))
    }

    async fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = timeout(self.io_timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Reads one CRLF-terminated line (CRLF stripped). `Ok(None)` means
    /// EOF with no partial data pending.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = self.buf.drain(..pos + 2).collect::<Vec<u8>>();
                let line = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
                return Ok(Some(line));
            }
            if self.buf.len() > MAX_LINE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "command line too long"));
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-line"))
                };
            }
        }
    }

    /// Reads the DATA body up to and including the terminating
    /// `<CRLF>.<CRLF>` line, returning the body with dot-stuffing undone
    /// and the terminator itself excluded. CRLFs within the body are
    /// preserved verbatim.
    pub async fn read_dot_body(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-message",
                ));
            };
            if line == "." {
                return Ok(out);
            }
            let unstuffed = line.strip_prefix('.').unwrap_or(&line);
            out.extend_from_slice(unstuffed.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Writes `body`, dot-stuffing any line that starts with `.`, and the
    /// `.\r\n` terminator.
    pub async fn write_dot_body(&mut self, body: &[u8]) -> io::Result<()> {
        for line in split_keep_crlf(body) {
            if line.starts_with(b".") {
                self.write_raw(b".").await?;
            }
            self.write_raw(line).await?;
        }
        self.write_raw(b".\r\n").await
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_raw(line.as_bytes()).await?;
        self.write_raw(b"\r\n").await
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        timeout(self.io_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        timeout(self.io_timeout, self.stream.flush())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "flush timed out"))??;
        Ok(())
    }

    /// Reads one SMTP response: a run of `NNN-...` continuation lines
    /// followed by a final `NNN ...` (or bare `NNN`) line. Returns the
    /// numeric code plus every line verbatim (without CRLF) so the
    /// caller can relay them unmodified.
    pub async fn read_response(&mut self) -> io::Result<(u16, Vec<String>)> {
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed awaiting response",
                ));
            };
            let is_final = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line.clone());
            if is_final {
                let code: u16 = line
                    .get(..3)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed response code"))?;
                return Ok((code, lines));
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Splits `data` into lines, each slice retaining its trailing `\r\n` (or
/// running to the end of `data` for a final unterminated line), so a
/// caller re-emitting them doesn't need to re-synthesize line endings.
fn split_keep_crlf(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            out.push(&data[start..i + 2]);
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    if start < data.len() {
        out.push(&data[start..]);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    fn io_with(initial: &[u8]) -> (SmtpIo, tokio::io::DuplexStream) {
        let (a, b) = duplex(8192);
        let mut io = SmtpIo::new(Box::new(a), Duration::from_secs(5));
        io.buf.extend_from_slice(initial);
        (io, b)
    }

    #[tokio::test]
    async fn read_line_from_preloaded_buffer() {
        let (mut io, _b) = io_with(b"EHLO foo\r\n");
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("EHLO foo"));
    }

    #[tokio::test]
    async fn dot_body_unstuffs_leading_dots() {
        let (mut io, _b) = io_with(b"hello\r\n..leading dot\r\nworld\r\n.\r\n");
        let body = io.read_dot_body().await.unwrap();
        assert_eq!(body, b"hello\r\n.leading dot\r\nworld\r\n");
    }

    #[tokio::test]
    async fn write_dot_body_stuffs_leading_dots() {
        let (a, mut b) = duplex(8192);
        let mut io = SmtpIo::new(Box::new(a), Duration::from_secs(5));
        io.write_dot_body(b"hello\r\n.leading dot\r\n").await.unwrap();
        let mut got = vec![0u8; 256];
        let n = b.read(&mut got).await.unwrap();
        assert_eq!(&got[..n], b"hello\r\n..leading dot\r\n.\r\n");
    }

    #[tokio::test]
    async fn read_response_collects_continuation_lines() {
        let (mut io, _b) = io_with(b"250-first\r\n250-second\r\n250 third\r\n");
        let (code, lines) = io.read_response().await.unwrap();
        assert_eq!(code, 250);
        assert_eq!(lines, vec!["250-first", "250-second", "250 third"]);
    }

    #[tokio::test]
    async fn read_line_eof_with_empty_buffer_is_none() {
        let (a, b) = duplex(8192);
        drop(b);
        let mut io = SmtpIo::new(Box::new(a), Duration::from_secs(5));
        assert!(io.read_line().await.unwrap().is_none());
    }
}
