//! Stall monitor: periodic progress reporting and dead-client detection.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::WindowBuffer;

use super::{SinkControl, TransferState, WorkerStatus};

/// Sampling interval and how many consecutive zero-progress samples mean
/// the client has gone away. Defaults: 1s and 12, i.e. a client that
/// consumes nothing for ~12 seconds is treated as disconnected.
#[derive(Debug, Clone, Copy)]
pub struct MonitorParams {
    pub interval: Duration,
    pub stall_samples: u32,
}

impl Default for MonitorParams {
    fn default() -> Self {
        MonitorParams {
            interval: Duration::from_secs(1),
            stall_samples: 12,
        }
    }
}

/// Samples delivered bytes and per-worker positions every interval,
/// reporting rates. After `stall_samples` consecutive samples with no
/// client progress the transfer is finished, the buffer closed and the
/// client sink force-closed so a drain loop blocked in a socket write
/// unblocks too.
pub(super) fn run(
    state: &TransferState,
    buffer: &WindowBuffer,
    workers: &[Arc<WorkerStatus>],
    sink: &dyn SinkControl,
    params: MonitorParams,
) {
    let mut last_sent = state.bytes_sent();
    let mut last_time = Instant::now();
    let mut last_positions: Vec<u64> = workers.iter().map(|w| w.position()).collect();
    let mut zero_progress = 0u32;

    while !state.is_finished() {
        thread::sleep(params.interval);
        let sent = state.bytes_sent();
        let now = Instant::now();
        let elapsed = now.duration_since(last_time);

        if sent == last_sent {
            zero_progress += 1;
            if zero_progress >= params.stall_samples {
                tracing::warn!(
                    bytes_sent = sent,
                    "client stopped consuming, killing transfer"
                );
                state.finish();
                buffer.close();
                sink.force_close();
                return;
            }
        } else {
            zero_progress = 0;
        }

        tracing::info!(
            bytes_sent = sent,
            rate_kbps = rate_kbps(sent.saturating_sub(last_sent), elapsed),
            "client progress"
        );
        for (i, worker) in workers.iter().enumerate() {
            let (start, end, position) = worker.snapshot();
            tracing::info!(
                worker = i,
                start,
                end,
                position,
                rate_kbps = rate_kbps(position.saturating_sub(last_positions[i]), elapsed),
                "worker progress"
            );
            last_positions[i] = position;
        }

        last_sent = sent;
        last_time = now;
    }
}

fn rate_kbps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs / 1000.0) as u64
}
