//! Origin response: status line and headers parsed, header bytes kept
//! verbatim so they can be relayed to the client unchanged.

use std::io::{BufReader, Read};
use std::net::TcpStream;

use super::{read_line, HttpError};

/// A response in the middle of being received: headers are fully parsed,
/// the body is read on demand through the `Read` impl. Dropping the
/// response closes the origin connection.
pub struct HttpResponse {
    status: u16,
    content_length: Option<u64>,
    header_bytes: Vec<u8>,
    reader: BufReader<TcpStream>,
}

impl HttpResponse {
    /// Reads and parses the status line and headers from an origin
    /// connection that has just been sent a request.
    pub fn read_from(stream: TcpStream) -> Result<HttpResponse, HttpError> {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();

        let status_line = read_line(&mut reader, &mut raw)?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| HttpError::BadStatusLine(status_line.clone()))?;

        let mut content_length = None;
        loop {
            let line = read_line(&mut reader, &mut raw)?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<u64>().ok();
                }
            }
        }

        Ok(HttpResponse {
            status,
            content_length,
            header_bytes: raw,
            reader,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Declared `Content-Length`, if the origin sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The status line and headers exactly as received, terminator blank
    /// line included, for verbatim passthrough to the client.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }
}

impl Read for HttpResponse {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}
