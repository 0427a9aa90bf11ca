//! Accelerated transfer engine.
//!
//! One transfer owns a window buffer, a segment planner, N segment workers,
//! a drain loop and a stall monitor. Workers pull non-overlapping ranges
//! from the planner, fetch them concurrently and write them into the buffer
//! at their absolute stream positions; the drain loop (running on the
//! connection's own thread) streams the contiguous prefix to the client and
//! the optional tee file. The `finished` flag is the cooperative
//! cancellation point for every participant.

mod drain;
mod monitor;
mod worker;

pub use monitor::MonitorParams;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::buffer::WindowBuffer;
use crate::config::ProxyConfig;
use crate::http::HttpRequest;
use crate::segmenter::{Segment, SegmentPlanner};

/// Per-attempt timeout for a worker's range fetch. Also bounds how long a
/// worker blocked in origin I/O takes to notice cancellation.
const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning knobs for one accelerated transfer, taken from the proxy config.
#[derive(Debug, Clone)]
pub struct AccelOptions {
    pub workers: usize,
    pub min_segment_bytes: u64,
    pub max_segment_bytes: u64,
    pub buffer_bytes: usize,
    pub output_dir: Option<PathBuf>,
}

impl AccelOptions {
    pub fn from_config(config: &ProxyConfig) -> Self {
        AccelOptions {
            workers: config.workers,
            min_segment_bytes: config.min_segment_bytes,
            max_segment_bytes: config.max_segment_bytes,
            buffer_bytes: config.buffer_bytes,
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Shared state of one transfer: the segment planner behind its own mutex,
/// the terminal `finished` flag, and the delivered-byte counter.
///
/// The planner mutex and the buffer's internal mutex are deliberately
/// independent locks; allocation is never serialised behind data copies and
/// the two critical sections never nest.
pub struct TransferState {
    planner: Mutex<SegmentPlanner>,
    finished: AtomicBool,
    bytes_sent: AtomicU64,
}

impl TransferState {
    pub fn new(content_length: u64, min_segment: u64, max_segment: u64) -> Self {
        TransferState {
            planner: Mutex::new(SegmentPlanner::new(content_length, min_segment, max_segment)),
            finished: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Hands the calling worker the next unassigned segment. Returns `None`
    /// when the transfer is finished (worker must exit) or the stream is
    /// fully allocated (nothing left to do). Two concurrent calls can never
    /// observe overlapping ranges: allocation happens under the planner lock.
    pub fn next_segment(&self) -> Option<Segment> {
        if self.is_finished() {
            return None;
        }
        self.planner.lock().unwrap().next()
    }

    /// Marks the transfer finished. Idempotent; called on success, on any
    /// fatal worker/drain error, and on a detected client stall.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

/// Live position of one worker, sampled by the stall monitor for
/// throughput reporting.
#[derive(Default)]
pub struct WorkerStatus {
    start: AtomicU64,
    end: AtomicU64,
    position: AtomicU64,
}

impl WorkerStatus {
    fn set_segment(&self, segment: Segment) {
        self.start.store(segment.start, Ordering::Relaxed);
        self.end.store(segment.end, Ordering::Relaxed);
        self.position.store(segment.start, Ordering::Relaxed);
    }

    fn advance_to(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.start.load(Ordering::Relaxed),
            self.end.load(Ordering::Relaxed),
            self.position.load(Ordering::Relaxed),
        )
    }
}

/// Handle the stall monitor uses to force-close the client connection once
/// the peer appears to have disconnected.
pub trait SinkControl: Sync {
    fn force_close(&self);
}

impl SinkControl for TcpStream {
    fn force_close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Runs one accelerated transfer to completion: spawns workers and the
/// stall monitor, drains the buffer to the client (and the optional tee
/// file), and tears everything down whichever way the transfer ends.
pub fn run_accelerated(
    request: &HttpRequest,
    content_length: u64,
    client: &mut TcpStream,
    opts: &AccelOptions,
) -> Result<()> {
    let buffer = WindowBuffer::new(opts.buffer_bytes);
    let state = TransferState::new(content_length, opts.min_segment_bytes, opts.max_segment_bytes);
    let statuses: Vec<Arc<WorkerStatus>> = (0..opts.workers.max(1))
        .map(|_| Arc::new(WorkerStatus::default()))
        .collect();

    let mut tee = open_tee(opts, request.file_name())?;
    let monitor_handle = client
        .try_clone()
        .context("clone client socket for stall monitor")?;

    tracing::debug!(
        content_length,
        workers = statuses.len(),
        buffer = opts.buffer_bytes,
        "starting accelerated transfer"
    );

    let result = thread::scope(|s| {
        let buffer = &buffer;
        let state = &state;
        for (id, status) in statuses.iter().enumerate() {
            let status = Arc::clone(status);
            s.spawn(move || worker::run(id, request, buffer, state, &status, FETCH_TIMEOUT));
        }
        {
            let statuses = &statuses[..];
            let monitor_handle = &monitor_handle;
            s.spawn(move || {
                monitor::run(state, buffer, statuses, monitor_handle, MonitorParams::default())
            });
        }

        let result = drain::run(buffer, state, client, tee.as_mut(), content_length);
        // Whatever ended the drain loop, every peer must unblock now.
        state.finish();
        buffer.close();
        result
    });

    if let Some(tee) = tee.as_mut() {
        tee.flush().context("flush tee file")?;
    }
    tracing::debug!(bytes_sent = state.bytes_sent(), "accelerated transfer done");
    result
}

/// Opens `output_dir/<file_name>` when a tee directory is configured and
/// the request yielded a usable file name.
fn open_tee(opts: &AccelOptions, file_name: &str) -> Result<Option<BufWriter<File>>> {
    let Some(dir) = &opts.output_dir else {
        return Ok(None);
    };
    if file_name.is_empty() {
        tracing::warn!("request has no file name, skipping tee output");
        return Ok(None);
    }
    let path = dir.join(file_name);
    let file = File::create(&path)
        .with_context(|| format!("create tee file {}", path.display()))?;
    tracing::info!(path = %path.display(), "teeing download to file");
    Ok(Some(BufWriter::new(file)))
}
