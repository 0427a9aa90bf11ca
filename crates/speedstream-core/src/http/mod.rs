//! Minimal HTTP/1.x plumbing for the proxy: inbound request parsing, the
//! upstream exchange, and response header parsing.
//!
//! The proxy must forward the client's request bytes to the origin and the
//! origin's response header bytes back to the client without normalisation,
//! so this layer speaks HTTP/1.x directly over `TcpStream` instead of going
//! through an HTTP client library.

mod request;
mod response;

pub use request::HttpRequest;
pub use response::HttpResponse;

use std::io;
use thiserror::Error;

/// Errors from parsing or exchanging HTTP messages.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before a full message was received")]
    UnexpectedEof,
    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),
    #[error("malformed status line: {0:?}")]
    BadStatusLine(String),
    #[error("request does not identify an upstream host")]
    MissingHost,
    #[error("invalid upstream host: {0:?}")]
    BadHost(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HttpError {
    /// True for transient read/connect timeouts, which segment workers
    /// retry on the same range instead of failing the transfer.
    pub fn is_timeout(&self) -> bool {
        match self {
            HttpError::Io(e) => {
                matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
            }
            _ => false,
        }
    }
}

/// Reads one CRLF-terminated line, returning it without the terminator and
/// appending the raw bytes (terminator included) to `raw`.
pub(crate) fn read_line<R: io::BufRead>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<String, HttpError> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(HttpError::UnexpectedEof);
    }
    raw.extend_from_slice(&line);
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
