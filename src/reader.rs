//! Bounded line reading over a raw byte stream
//!
//! SMTP is a line protocol spoken by untrusted peers: a client may stall
//! forever mid-line or stream bytes without ever sending a terminator. The
//! reader bounds both, with an idle timeout on every read and a cap on how
//! many bytes may sit buffered while no delimiter has arrived.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time;

use crate::error::SessionError;

const READ_CHUNK: usize = 4096;

/// Extracts `\n`-terminated lines from an [`AsyncRead`], buffering partial
/// reads between calls.
///
/// The timeout is per read, not per session: it restarts whenever bytes
/// arrive. The length limit applies to buffered-but-undelimited bytes and
/// to the position of the delimiter itself.
pub struct LineReader<R> {
    stream: R,
    buf: Vec<u8>,
    timeout: Duration,
    limit: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(stream: R, timeout: Duration, limit: usize) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            timeout,
            limit,
        }
    }

    /// Read one line, including its terminator.
    ///
    /// Returns `Ok(None)` on EOF with nothing buffered. If the stream
    /// closes with bytes still pending, those bytes are returned once as a
    /// final, unterminated line. Non-UTF-8 input is replaced, not refused.
    pub async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                if pos > self.limit {
                    return Err(SessionError::LineTooLong { limit: self.limit });
                }
                let rest = self.buf.split_off(pos + 1);
                let line = std::mem::replace(&mut self.buf, rest);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.buf.len() > self.limit {
                return Err(SessionError::LineTooLong { limit: self.limit });
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match time::timeout(self.timeout, self.stream.read(&mut chunk)).await {
                Err(_) => return Err(SessionError::Timeout),
                Ok(Ok(n)) => n,
                // A peer resetting the connection reads the same as it
                // closing it.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => 0,
                Ok(Err(e)) => return Err(e.into()),
            };
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
