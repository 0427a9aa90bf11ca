//! Accept loop and per-connection handling.
//!
//! Each client connection gets its own thread: parse the request, perform
//! the initial origin exchange, relay the response headers, then either
//! hand the body off to the accelerated engine or stream it through
//! directly.

use anyhow::{Context, Result};
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crate::accel::{self, AccelOptions};
use crate::config::ProxyConfig;
use crate::http::HttpRequest;

/// Read timeout on the client socket while parsing its request.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for the initial origin exchange and for passthrough bodies.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
/// Bodies larger than this (with an eligible method and status) are
/// downloaded as concurrent range segments.
const ACCEL_THRESHOLD_BYTES: u64 = 5_000_000;

/// Binds the configured port and serves until the listener fails.
pub fn serve(config: &ProxyConfig) -> Result<()> {
    config.validate()?;
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .with_context(|| format!("bind port {}", config.port))?;
    tracing::info!(port = config.port, "speedstream listening");
    serve_on(listener, config)
}

/// Accept loop over an already-bound listener (lets tests pick an
/// ephemeral port).
pub fn serve_on(listener: TcpListener, config: &ProxyConfig) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(client) => {
                let config = config.clone();
                thread::spawn(move || {
                    let peer = client
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "unknown".into());
                    if let Err(e) = handle_connection(client, &config) {
                        tracing::warn!(peer = %peer, "connection failed: {e:#}");
                    }
                });
            }
            Err(e) => tracing::warn!("accept failed: {e}"),
        }
    }
    Ok(())
}

/// One proxied request: parse, exchange, relay headers, then accelerate or
/// pass through.
fn handle_connection(mut client: TcpStream, config: &ProxyConfig) -> Result<()> {
    client
        .set_read_timeout(Some(CLIENT_READ_TIMEOUT))
        .context("set client read timeout")?;
    let mut reader = BufReader::new(client.try_clone().context("clone client socket")?);
    let request = HttpRequest::parse(&mut reader).context("parse client request")?;
    tracing::debug!(
        method = request.method(),
        host = request.host(),
        port = request.port(),
        "proxying request"
    );

    let response = request
        .execute(UPSTREAM_TIMEOUT)
        .context("initial origin exchange")?;
    client
        .write_all(response.header_bytes())
        .context("relay response headers")?;
    client.flush()?;

    let status = response.status();
    let content_length = response.content_length();
    tracing::debug!(status, ?content_length, "origin response");

    if should_accelerate(request.method(), status, content_length) {
        // The initial connection is dropped; workers re-fetch the body as
        // range segments on their own connections.
        let content_length = content_length.unwrap_or(0);
        drop(response);
        accel::run_accelerated(
            &request,
            content_length,
            &mut client,
            &AccelOptions::from_config(config),
        )?;
    } else if !(300..400).contains(&status) && !request.method().eq_ignore_ascii_case("HEAD") {
        passthrough(response, &mut client)?;
    }
    Ok(())
}

/// Direct streaming for responses the accelerator does not handle:
/// redirects and HEAD carry no body worth copying; everything else is
/// relayed up to `Content-Length` bytes, or to EOF when the length is
/// unknown.
fn passthrough(response: crate::http::HttpResponse, client: &mut TcpStream) -> Result<()> {
    let n = match response.content_length() {
        Some(len) => std::io::copy(&mut response.take(len), client),
        None => {
            let mut response = response;
            std::io::copy(&mut response, client)
        }
    }
    .context("passthrough body")?;
    client.flush()?;
    tracing::debug!(bytes = n, "passthrough complete");
    Ok(())
}

fn should_accelerate(method: &str, status: u16, content_length: Option<u64>) -> bool {
    method.eq_ignore_ascii_case("GET")
        && (status == 200 || status == 206)
        && content_length.is_some_and(|len| len > ACCEL_THRESHOLD_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceleration_requires_get_good_status_and_size() {
        let big = Some(ACCEL_THRESHOLD_BYTES + 1);
        assert!(should_accelerate("GET", 200, big));
        assert!(should_accelerate("get", 206, big));

        assert!(!should_accelerate("POST", 200, big));
        assert!(!should_accelerate("HEAD", 200, big));
        assert!(!should_accelerate("GET", 302, big));
        assert!(!should_accelerate("GET", 404, big));
        assert!(!should_accelerate("GET", 200, Some(ACCEL_THRESHOLD_BYTES)));
        assert!(!should_accelerate("GET", 200, None));
    }
}
