//! Segment worker: fetches assigned ranges and writes them into the window.

use std::io::Read;
use std::time::Duration;

use crate::buffer::WindowBuffer;
use crate::http::{HttpError, HttpRequest};
use crate::segmenter::Segment;

use super::{TransferState, WorkerStatus};

/// Body read chunk size. Must stay well below the window capacity so a
/// single write can always fit.
const CHUNK: usize = 16 * 1024;

/// Worker loop: pull a segment, stream it into the buffer, repeat. A
/// timeout mid-segment retries the same segment from the first unconfirmed
/// position; any other failure is fatal to the whole transfer.
pub(super) fn run(
    id: usize,
    request: &HttpRequest,
    buffer: &WindowBuffer,
    state: &TransferState,
    status: &WorkerStatus,
    fetch_timeout: Duration,
) {
    while let Some(segment) = state.next_segment() {
        status.set_segment(segment);
        let mut position = segment.start;
        while position < segment.end && !state.is_finished() {
            match stream_range(request, buffer, state, status, segment, &mut position, fetch_timeout)
            {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    tracing::debug!(worker = id, position, "timeout, retrying segment");
                }
                Err(e) => {
                    tracing::warn!(worker = id, position, error = %e, "segment fetch failed, aborting transfer");
                    state.finish();
                    // Unblock the drain loop and any peers waiting on the window.
                    buffer.close();
                    return;
                }
            }
        }
        tracing::trace!(worker = id, start = segment.start, end = segment.end, "segment done");
    }
    tracing::debug!(worker = id, "worker exiting");
}

/// One fetch attempt: issues a range request from `*position` to the
/// segment end and copies the body into the buffer, advancing `*position`
/// as bytes are confirmed written. Returns early (Ok) when cancellation is
/// observed; a body that ends before the segment does is a protocol error.
fn stream_range(
    request: &HttpRequest,
    buffer: &WindowBuffer,
    state: &TransferState,
    status: &WorkerStatus,
    segment: Segment,
    position: &mut u64,
    fetch_timeout: Duration,
) -> Result<(), HttpError> {
    let mut response = request.execute_range(*position, segment.end - 1, fetch_timeout)?;
    let status_code = response.status();
    let whole_stream = segment.len() == response.content_length().unwrap_or(0) && *position == 0;
    if status_code != 206 && !(status_code == 200 && whole_stream) {
        // An origin that ignores ranges would corrupt the reassembly.
        return Err(HttpError::BadStatusLine(format!(
            "origin answered range request with HTTP {}",
            status_code
        )));
    }

    let mut chunk = [0u8; CHUNK];
    while *position < segment.end && !state.is_finished() {
        let want = chunk.len().min((segment.end - *position) as usize);
        let n = match response.read(&mut chunk[..want]) {
            Ok(0) => {
                return Err(HttpError::UnexpectedEof);
            }
            Ok(n) => n,
            Err(e) => return Err(HttpError::Io(e)),
        };
        if buffer.write(&chunk[..n], *position).is_err() {
            // Buffer closed: the transfer is over, nothing to report.
            return Ok(());
        }
        *position += n as u64;
        status.advance_to(*position);
    }
    Ok(())
}
