//! Inbound proxy request: parsing and upstream replay.

use std::io::{BufRead, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::response::HttpResponse;
use super::{read_line, HttpError};

const DEFAULT_HTTP_PORT: u16 = 80;

/// A parsed client request that can be replayed against the origin any
/// number of times, each time with a different `Range` header.
///
/// Host and port are resolved from, in priority order: the legacy
/// `jeturl=<host><path>` query parameter (which also rewrites the request
/// line to the embedded path), the `Host` header, or an absolute-URI
/// request line.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    request_line: String,
    method: String,
    file_name: String,
    /// Header name/value pairs in arrival order, names preserved verbatim
    /// so the origin sees exactly what the client sent.
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    host: String,
    port: u16,
    /// Start offset of any `Range` header on the original request; replayed
    /// ranges are shifted by this so segment positions stay stream-relative.
    range_start: u64,
}

impl HttpRequest {
    /// Parses a request (line, headers, and body when `Content-Length` is
    /// present) from the client connection.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<HttpRequest, HttpError> {
        let mut raw = Vec::new();
        let request_line = read_line(reader, &mut raw)?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| HttpError::BadRequestLine(request_line.clone()))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| HttpError::BadRequestLine(request_line.clone()))?
            .to_string();
        let version = parts.next().unwrap_or("HTTP/1.0").to_string();

        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            let line = read_line(reader, &mut raw)?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let body = match header_value(&headers, "content-length") {
            Some(v) => {
                let len: usize = v
                    .parse()
                    .map_err(|_| HttpError::BadRequestLine(request_line.clone()))?;
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body)?;
                Some(body)
            }
            None => None,
        };

        let mut request_line = request_line;
        let mut target = target;
        let host_port;
        if let Some(idx) = target.find("jeturl=") {
            // Legacy embedded-URL form: the real host and path live in the
            // query string and the Host header (if any) points at the proxy.
            let embedded = &target[idx + "jeturl=".len()..];
            let slash = embedded
                .find('/')
                .ok_or_else(|| HttpError::BadHost(embedded.to_string()))?;
            host_port = embedded[..slash].to_string();
            target = embedded[slash..].to_string();
            request_line = format!("{} {} {}", method, target, version);
            set_header(&mut headers, "Host", &host_port);
        } else if let Some(host) = header_value(&headers, "host") {
            host_port = host.to_string();
        } else if target.contains("://") {
            let url = url::Url::parse(&target)
                .map_err(|_| HttpError::BadRequestLine(request_line.clone()))?;
            let host = url.host_str().ok_or(HttpError::MissingHost)?;
            host_port = match url.port() {
                Some(p) => format!("{}:{}", host, p),
                None => host.to_string(),
            };
        } else {
            return Err(HttpError::MissingHost);
        }

        let (host, port) = split_host_port(&host_port)?;

        let range_start = header_value(&headers, "range")
            .and_then(parse_range_start)
            .unwrap_or(0);

        Ok(HttpRequest {
            file_name: file_name_of(&target),
            request_line,
            method,
            headers,
            body,
            host,
            port,
            range_start,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Last path component of the request target, query stripped; used as
    /// the tee file name. May be empty (e.g. a request for `/`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Performs the original exchange against the origin: the stored
    /// request is forwarded as-is (any client `Range` header included).
    pub fn execute(&self, timeout: Duration) -> Result<HttpResponse, HttpError> {
        self.exchange(None, timeout)
    }

    /// Replays the stored request with `Range: bytes={start}-{end_incl}`
    /// (shifted by any range start on the original request), over a fresh
    /// connection with the given read timeout.
    pub fn execute_range(
        &self,
        start: u64,
        end_incl: u64,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        self.exchange(Some((start, end_incl)), timeout)
    }

    fn exchange(
        &self,
        range: Option<(u64, u64)>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let mut stream = self.connect(timeout)?;
        stream.write_all(&self.serialize(range))?;
        stream.flush()?;
        HttpResponse::read_from(stream)
    }

    /// Wire form of the request. When `range` is given, any stored `Range`
    /// header is dropped and replaced with one shifted by `range_start`.
    fn serialize(&self, range: Option<(u64, u64)>) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(self.request_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            if range.is_some() && name.eq_ignore_ascii_case("range") {
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if let Some((start, end_incl)) = range {
            out.extend_from_slice(
                format!(
                    "Range: bytes={}-{}\r\n",
                    self.range_start + start,
                    self.range_start + end_incl
                )
                .as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }

    fn connect(&self, timeout: Duration) -> Result<TcpStream, HttpError> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => HttpError::Io(e),
            None => HttpError::BadHost(format!("{}:{}", self.host, self.port)),
        })
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        entry.1 = value.to_string();
    } else {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn split_host_port(host_port: &str) -> Result<(String, u16), HttpError> {
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| HttpError::BadHost(host_port.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((host_port.to_string(), DEFAULT_HTTP_PORT)),
    }
}

/// `bytes=X-...` -> X.
fn parse_range_start(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes=")?;
    rest.split('-').next()?.trim().parse().ok()
}

fn file_name_of(target: &str) -> String {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    path.rsplit('/').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn parse(raw: &str) -> HttpRequest {
        HttpRequest::parse(&mut BufReader::new(raw.as_bytes())).unwrap()
    }

    #[test]
    fn host_header_with_port() {
        let req = parse("GET /files/big.iso HTTP/1.1\r\nHost: mirror.example:8080\r\n\r\n");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.host(), "mirror.example");
        assert_eq!(req.port(), 8080);
        assert_eq!(req.file_name(), "big.iso");
    }

    #[test]
    fn host_header_default_port() {
        let req = parse("GET /a/b.bin HTTP/1.1\r\nHost: mirror.example\r\n\r\n");
        assert_eq!(req.port(), 80);
    }

    #[test]
    fn absolute_uri_request_line() {
        let req = parse("GET http://origin.example:9000/pub/file.zip HTTP/1.0\r\n\r\n");
        assert_eq!(req.host(), "origin.example");
        assert_eq!(req.port(), 9000);
        assert_eq!(req.file_name(), "file.zip");
    }

    #[test]
    fn jeturl_rewrites_request_line_and_host() {
        let req = parse(
            "GET /stream?jeturl=media.example:8081/videos/clip.mp4 HTTP/1.1\r\nHost: proxy.local\r\n\r\n",
        );
        assert_eq!(req.host(), "media.example");
        assert_eq!(req.port(), 8081);
        assert_eq!(req.request_line, "GET /videos/clip.mp4 HTTP/1.1");
        assert_eq!(header_value(&req.headers, "host"), Some("media.example:8081"));
        assert_eq!(req.file_name(), "clip.mp4");
    }

    #[test]
    fn missing_host_is_an_error() {
        let r = HttpRequest::parse(&mut BufReader::new(&b"GET /x HTTP/1.1\r\n\r\n"[..]));
        assert!(matches!(r, Err(HttpError::MissingHost)));
    }

    #[test]
    fn captures_original_range_start() {
        let req = parse(
            "GET /f HTTP/1.1\r\nHost: h\r\nRange: bytes=5000-\r\n\r\n",
        );
        assert_eq!(req.range_start, 5000);
        let req = parse("GET /f HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(req.range_start, 0);
    }

    #[test]
    fn body_read_when_content_length_present() {
        let req = parse("POST /f HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(req.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn file_name_strips_query() {
        assert_eq!(file_name_of("/a/b/c.bin?x=1"), "c.bin");
        assert_eq!(file_name_of("/"), "");
    }

    #[test]
    fn range_replacement_is_relative_to_original_start() {
        let req = parse("GET /f HTTP/1.1\r\nHost: h\r\nRange: bytes=1000-\r\n\r\n");
        let wire = String::from_utf8(req.serialize(Some((200, 499)))).unwrap();
        assert!(wire.contains("Range: bytes=1200-1499\r\n"), "{wire}");
        // The client's own Range header must not also be forwarded.
        assert!(!wire.contains("bytes=1000-"), "{wire}");
    }

    #[test]
    fn serialize_without_range_keeps_original_headers() {
        let req = parse("GET /f HTTP/1.1\r\nHost: h\r\nRange: bytes=1000-\r\n\r\n");
        let wire = String::from_utf8(req.serialize(None)).unwrap();
        assert!(wire.starts_with("GET /f HTTP/1.1\r\n"));
        assert!(wire.contains("Range: bytes=1000-\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }
}
