//! Drain loop: moves the buffer's contiguous prefix to the client sink.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::buffer::WindowBuffer;

use super::TransferState;

/// Client-side read granularity.
const CHUNK: usize = 4096;

/// Streams exactly `content_length` bytes from the buffer to `client` (and
/// the tee writer, when present), in stream order. Each read is clamped to
/// the bytes remaining so the final read asks for exactly the closing run
/// and terminates cleanly. Ends early, without error, if the transfer is
/// flagged finished or the buffer is closed under it.
pub(super) fn run<W: Write>(
    buffer: &WindowBuffer,
    state: &TransferState,
    client: &mut W,
    mut tee: Option<&mut BufWriter<File>>,
    content_length: u64,
) -> Result<()> {
    let mut chunk = [0u8; CHUNK];
    let mut sent: u64 = 0;
    while sent < content_length && !state.is_finished() {
        let want = (chunk.len() as u64).min(content_length - sent) as usize;
        let n = buffer.read(&mut chunk[..want]);
        if n == 0 {
            // Closed with nothing left: a worker or the monitor gave up.
            break;
        }
        client
            .write_all(&chunk[..n])
            .context("write to proxy client")?;
        if let Some(tee) = tee.as_mut() {
            tee.write_all(&chunk[..n]).context("write to tee file")?;
        }
        sent += n as u64;
        state.add_bytes_sent(n as u64);
    }
    client.flush().context("flush proxy client")?;
    Ok(())
}
