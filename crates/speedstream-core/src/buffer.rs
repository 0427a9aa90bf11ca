//! Sliding-window ring buffer over a logical byte stream.
//!
//! The buffer is a fixed-size window `[read_cursor, read_cursor + capacity)`
//! into an ever-growing stream. Many workers write at absolute stream
//! positions; a single reader consumes the stream strictly in order. A
//! per-slot `ready` bitmap records which physical slots hold data for their
//! current logical position, so the reader only ever advances past a
//! contiguous prefix and out-of-order segment completion can never reorder
//! output.
//!
//! # Invariants
//! - The physical slot for absolute position `p` is `p % capacity`, valid
//!   only while `read_cursor <= p < read_cursor + capacity`.
//! - A write blocks while it would overrun the window
//!   (`at + len > read_cursor + capacity`); a read blocks while fewer than
//!   the requested number of contiguous bytes are ready. Both unblock
//!   promptly once the buffer is closed.
//!
//! The capacity bound is the only backpressure mechanism: a slow reader
//! throttles writers and an empty window throttles the reader.

use std::fmt;
use std::sync::{Condvar, Mutex};

/// Error returned when writing to a window buffer that has been closed.
#[derive(Debug)]
pub struct BufferClosed;

impl fmt::Display for BufferClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window buffer closed")
    }
}

impl std::error::Error for BufferClosed {}

struct Inner {
    buf: Vec<u8>,
    /// True iff the slot holds a byte for the logical position it currently
    /// represents that has not yet been consumed.
    ready: Vec<bool>,
    /// Absolute stream position of the oldest byte not yet read.
    read_cursor: u64,
    /// `read_cursor % capacity`, kept in step to avoid repeated division.
    read_slot: usize,
    closed: bool,
}

impl Inner {
    /// Length of the contiguous ready run at the read position, capped at `max`.
    fn ready_run(&self, max: usize) -> usize {
        let cap = self.buf.len();
        let mut n = 0;
        while n < max && self.ready[(self.read_slot + n) % cap] {
            n += 1;
        }
        n
    }
}

/// Fixed-capacity window buffer: many concurrent positioned writers, one
/// sequential reader, blocking backpressure in both directions.
pub struct WindowBuffer {
    inner: Mutex<Inner>,
    /// Signalled when new bytes become ready at the front of the window.
    data_ready: Condvar,
    /// Signalled when the reader advances the window (space freed) or on close.
    space_free: Condvar,
}

impl WindowBuffer {
    /// Creates a buffer with the given capacity in bytes.
    ///
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window buffer capacity must be > 0");
        WindowBuffer {
            inner: Mutex::new(Inner {
                buf: vec![0u8; capacity],
                ready: vec![false; capacity],
                read_cursor: 0,
                read_slot: 0,
                closed: false,
            }),
            data_ready: Condvar::new(),
            space_free: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    /// Copies `bytes` into the window at absolute stream position `at`,
    /// blocking while the write would overrun the unread window. Marks the
    /// written slots ready. Returns `Err(BufferClosed)` once the buffer has
    /// been closed, whether before the call or while blocked.
    ///
    /// Callers must write each position at most once and never below the
    /// read cursor; the scheduler's non-overlapping segment allocation
    /// guarantees both.
    pub fn write(&self, bytes: &[u8], at: u64) -> Result<(), BufferClosed> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.buf.len();
        debug_assert!(bytes.len() <= cap, "write larger than the window");
        while !inner.closed && at + bytes.len() as u64 > inner.read_cursor + cap as u64 {
            inner = self.space_free.wait(inner).unwrap();
        }
        if inner.closed {
            return Err(BufferClosed);
        }
        debug_assert!(at >= inner.read_cursor, "write below the read cursor");

        let slot = (at % cap as u64) as usize;
        let first = bytes.len().min(cap - slot);
        inner.buf[slot..slot + first].copy_from_slice(&bytes[..first]);
        inner.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        for r in &mut inner.ready[slot..slot + first] {
            *r = true;
        }
        let rest = bytes.len() - first;
        for r in &mut inner.ready[..rest] {
            *r = true;
        }

        self.data_ready.notify_one();
        Ok(())
    }

    /// Reads up to `out.len()` bytes from the front of the window into
    /// `out`, blocking until that many contiguous bytes are ready or the
    /// buffer is closed. Returns the number of bytes copied, which is less
    /// than `out.len()` only after close (and 0 once nothing remains).
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock().unwrap();
        // A request larger than the window could never be satisfied whole.
        let want = out.len().min(inner.buf.len());
        loop {
            let run = inner.ready_run(want);
            if run >= want || inner.closed {
                break;
            }
            inner = self.data_ready.wait(inner).unwrap();
        }
        let run = inner.ready_run(want);

        let cap = inner.buf.len();
        let start = inner.read_slot;
        let first = run.min(cap - start);
        out[..first].copy_from_slice(&inner.buf[start..start + first]);
        out[first..run].copy_from_slice(&inner.buf[..run - first]);
        for r in &mut inner.ready[start..start + first] {
            *r = false;
        }
        for r in &mut inner.ready[..run - first] {
            *r = false;
        }
        inner.read_cursor += run as u64;
        inner.read_slot = (start + run) % cap;

        self.space_free.notify_all();
        run
    }

    /// Closes the buffer. Idempotent; all blocked and future `read`/`write`
    /// calls return promptly.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.data_ready.notify_all();
        self.space_free.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_writer_read_back() {
        // Filling the entire window in one write, then reading it all back,
        // must work without blocking: position 9 is still inside [0, 10).
        let buf = WindowBuffer::new(10);
        assert_eq!(buf.capacity(), 10);
        buf.write(b"0123456789", 0).unwrap();
        let mut out = [0u8; 10];
        assert_eq!(buf.read(&mut out), 10);
        assert_eq!(&out, b"0123456789");
    }

    #[test]
    fn read_blocks_until_gap_fills() {
        // Bytes for [5, 10) land before [0, 5); the reader must still see
        // positions 0..9 in order.
        let buf = Arc::new(WindowBuffer::new(16));
        buf.write(b"56789", 5).unwrap();
        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut out = [0u8; 10];
                let n = buf.read(&mut out);
                (n, out)
            })
        };
        thread::sleep(Duration::from_millis(50));
        buf.write(b"01234", 0).unwrap();
        let (n, out) = reader.join().unwrap();
        assert_eq!(n, 10);
        assert_eq!(&out, b"0123456789");
    }

    #[test]
    fn write_past_window_blocks_until_reader_advances() {
        let buf = Arc::new(WindowBuffer::new(10));
        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let buf = Arc::clone(&buf);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                // 12 + 5 > 0 + 10: overruns the window until read_cursor >= 7.
                buf.write(b"vwxyz", 12).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };
        // A write ending exactly at the window edge is legal and must not block.
        buf.write(b"0123456789", 0).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "writer should be blocked");

        let mut out = [0u8; 8];
        assert_eq!(buf.read(&mut out), 8);
        assert_eq!(&out, b"01234567");
        buf.write(b"ab", 10).unwrap();
        writer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        let mut rest = [0u8; 9];
        assert_eq!(buf.read(&mut rest), 9);
        assert_eq!(&rest, b"89abvwxyz");
    }

    #[test]
    fn wraparound_copy_is_split_correctly() {
        let buf = WindowBuffer::new(8);
        buf.write(b"abcdef", 0).unwrap();
        let mut out = [0u8; 6];
        assert_eq!(buf.read(&mut out), 6);
        // Positions 6..11 wrap over the end of the backing array.
        buf.write(b"ghijkl", 6).unwrap();
        assert_eq!(buf.read(&mut out), 6);
        assert_eq!(&out, b"ghijkl");
    }

    #[test]
    fn concurrent_out_of_order_writers_preserve_order() {
        let buf = Arc::new(WindowBuffer::new(64));
        let mut expected = Vec::new();
        for i in 0..96u8 {
            expected.push(i);
        }
        // Three writers, interleaved segments, deliberately started in
        // reverse order of their positions.
        let mut handles = Vec::new();
        for (delay_ms, start) in [(30u64, 0u64), (15, 32), (0, 64)] {
            let buf = Arc::clone(&buf);
            let chunk: Vec<u8> = (start as u8..start as u8 + 32).collect();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                // Writes beyond the 64-byte window block until the reader
                // catches up, exercising backpressure too.
                buf.write(&chunk, start).unwrap();
            }));
        }
        let mut got = vec![0u8; 96];
        let mut read = 0;
        while read < 96 {
            let n = buf.read(&mut got[read..(read + 16).min(96)]);
            assert!(n > 0);
            read += n;
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn close_is_idempotent_and_unblocks() {
        let buf = Arc::new(WindowBuffer::new(10));
        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut out = [0u8; 5];
                buf.read(&mut out)
            })
        };
        thread::sleep(Duration::from_millis(20));
        buf.close();
        buf.close();
        assert_eq!(reader.join().unwrap(), 0);
        assert!(buf.write(b"x", 0).is_err());
        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out), 0);
    }

    #[test]
    fn close_returns_short_read_of_remaining_prefix() {
        let buf = Arc::new(WindowBuffer::new(10));
        buf.write(b"abc", 0).unwrap();
        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut out = [0u8; 8];
                let n = buf.read(&mut out);
                (n, out)
            })
        };
        thread::sleep(Duration::from_millis(20));
        buf.close();
        let (n, out) = reader.join().unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], b"abc");
    }
}
