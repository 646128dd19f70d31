//! Bounded byte channel between the capture producer and the analysis consumer.
//!
//! One producer thread writes captured audio bytes in, one consumer thread reads
//! them out. Both sides block with bounded waits, and each side can be aborted
//! independently. The reader can additionally be woken without an abort
//! (`unblock_reader`) so the consumer loop can shut down cleanly while leaving
//! buffered audio intact.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a blocking ring-buffer transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes were moved. A read woken by `unblock_reader` reports `Delivered(0)`.
    Delivered(usize),
    /// The bounded wait elapsed before a single byte could move.
    TimedOut,
    /// The operation's side of the buffer was aborted.
    Aborted,
    /// The writer signalled end-of-stream and no more data will arrive.
    StreamEnded,
}

impl TransferOutcome {
    /// Bytes actually transferred; zero for every non-`Delivered` outcome.
    pub fn bytes(self) -> usize {
        match self {
            TransferOutcome::Delivered(n) => n,
            _ => 0,
        }
    }
}

struct State {
    storage: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    filled: usize,
    abort_read: bool,
    abort_write: bool,
    writer_finished: bool,
    reader_unblock: bool,
}

impl State {
    fn check_invariants(&self) {
        debug_assert!(self.filled <= self.storage.len());
        debug_assert!(self.read_pos < self.storage.len());
        debug_assert!(self.write_pos < self.storage.len());
    }
}

/// Fixed-capacity byte ring shared between exactly one producer and one consumer.
pub struct RingBuffer {
    name: String,
    capacity: usize,
    state: Mutex<State>,
    can_read: Condvar,
    can_write: Condvar,
}

impl RingBuffer {
    pub fn new(name: &str, capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            name: name.to_string(),
            capacity,
            state: Mutex::new(State {
                storage: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                filled: 0,
                abort_read: false,
                abort_write: false,
                writer_finished: false,
                reader_unblock: false,
            }),
            can_read: Condvar::new(),
            can_write: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Instantaneous snapshot of the bytes available to read. Racy but safe.
    pub fn filled(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.filled,
            Err(_) => 0,
        }
    }

    /// Instantaneous snapshot of the bytes available to write. Racy but safe.
    pub fn available(&self) -> usize {
        self.capacity - self.filled()
    }

    pub fn is_writer_finished(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.writer_finished,
            Err(_) => true,
        }
    }

    /// Writes as many bytes of `buf` as currently fit, blocking up to `max_wait`
    /// for at least one byte of space. Wakes a blocked reader on success.
    pub fn write(&self, buf: &[u8], max_wait: Duration) -> TransferOutcome {
        if buf.is_empty() {
            return TransferOutcome::Delivered(0);
        }
        let deadline = Instant::now() + max_wait;
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return TransferOutcome::Aborted,
        };
        loop {
            if state.abort_write {
                return TransferOutcome::Aborted;
            }
            if state.writer_finished {
                return TransferOutcome::StreamEnded;
            }
            if state.filled < self.capacity {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return TransferOutcome::TimedOut;
            }
            state = match self.can_write.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(_) => return TransferOutcome::Aborted,
            };
        }

        let n = buf.len().min(self.capacity - state.filled);
        let write_pos = state.write_pos;
        let first = n.min(self.capacity - write_pos);
        state.storage[write_pos..write_pos + first].copy_from_slice(&buf[..first]);
        if n > first {
            state.storage[..n - first].copy_from_slice(&buf[first..n]);
        }
        state.write_pos = (write_pos + n) % self.capacity;
        state.filled += n;
        state.check_invariants();
        self.can_read.notify_one();
        TransferOutcome::Delivered(n)
    }

    /// Reads up to `buf.len()` bytes, blocking up to `max_wait` for at least one
    /// byte. Buffered data is drained even after the writer has finished; only an
    /// empty, finished buffer reports `StreamEnded`. Wakes a blocked writer on
    /// success.
    pub fn read(&self, buf: &mut [u8], max_wait: Duration) -> TransferOutcome {
        if buf.is_empty() {
            return TransferOutcome::Delivered(0);
        }
        let deadline = Instant::now() + max_wait;
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return TransferOutcome::Aborted,
        };
        loop {
            if state.abort_read {
                return TransferOutcome::Aborted;
            }
            if state.reader_unblock {
                state.reader_unblock = false;
                return TransferOutcome::Delivered(0);
            }
            if state.filled > 0 {
                break;
            }
            if state.writer_finished {
                return TransferOutcome::StreamEnded;
            }
            let now = Instant::now();
            if now >= deadline {
                return TransferOutcome::TimedOut;
            }
            state = match self.can_read.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(_) => return TransferOutcome::Aborted,
            };
        }

        let n = buf.len().min(state.filled);
        let read_pos = state.read_pos;
        let first = n.min(self.capacity - read_pos);
        buf[..first].copy_from_slice(&state.storage[read_pos..read_pos + first]);
        if n > first {
            buf[first..n].copy_from_slice(&state.storage[..n - first]);
        }
        state.read_pos = (read_pos + n) % self.capacity;
        state.filled -= n;
        state.check_invariants();
        self.can_write.notify_one();
        TransferOutcome::Delivered(n)
    }

    /// Idempotent. Any blocked reader is woken; further reads fail until `reset`.
    pub fn abort_read(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.abort_read = true;
        }
        self.can_read.notify_all();
    }

    /// Idempotent. Any blocked writer is woken; further writes fail until `reset`.
    pub fn abort_write(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.abort_write = true;
        }
        self.can_write.notify_all();
    }

    /// Aborts both sides.
    pub fn abort(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.abort_read = true;
            state.abort_write = true;
        }
        self.can_read.notify_all();
        self.can_write.notify_all();
    }

    /// Restores the buffer to empty and clears every abort/finished/unblock flag.
    /// Only valid when no operation is in flight.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.read_pos = 0;
            state.write_pos = 0;
            state.filled = 0;
            state.abort_read = false;
            state.abort_write = false;
            state.writer_finished = false;
            state.reader_unblock = false;
            state.check_invariants();
        }
        log::debug!("ring buffer '{}' reset", self.name);
    }

    /// Marks end-of-stream. A reader blocked on an empty buffer is woken and told
    /// no more data will arrive. Distinct from an abort, which signals cancellation.
    pub fn signal_writer_finished(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.writer_finished = true;
        }
        self.can_read.notify_all();
        self.can_write.notify_all();
        log::debug!("ring buffer '{}' writer finished", self.name);
    }

    /// Makes an in-progress blocking read return `Delivered(0)` without treating
    /// it as an error, for cooperative shutdown that keeps buffered data.
    pub fn unblock_reader(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.reader_unblock = true;
        }
        self.can_read.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn fifo_order_across_wraparound() {
        let rb = RingBuffer::new("test", 8);
        let mut out = [0u8; 8];

        // Fill, drain half, refill so the cursors wrap.
        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6], SHORT), TransferOutcome::Delivered(6));
        assert_eq!(rb.read(&mut out[..4], SHORT), TransferOutcome::Delivered(4));
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(rb.write(&[7, 8, 9, 10], SHORT), TransferOutcome::Delivered(4));
        assert_eq!(rb.filled(), 6);
        assert_eq!(rb.read(&mut out[..6], SHORT), TransferOutcome::Delivered(6));
        assert_eq!(&out[..6], &[5, 6, 7, 8, 9, 10]);
        assert_eq!(rb.filled(), 0);
        assert_eq!(rb.available(), 8);
    }

    #[test]
    fn read_on_empty_times_out() {
        let rb = RingBuffer::new("test", 4);
        let mut out = [0u8; 4];
        let start = Instant::now();
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::TimedOut);
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn write_on_full_times_out_and_partial_write_reports_fit() {
        let rb = RingBuffer::new("test", 4);
        // Six bytes offered, four fit.
        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6], SHORT), TransferOutcome::Delivered(4));
        assert_eq!(rb.write(&[7], SHORT), TransferOutcome::TimedOut);
        assert_eq!(rb.filled(), 4);
    }

    #[test]
    fn abort_wakes_blocked_reader() {
        let rb = Arc::new(RingBuffer::new("test", 4));
        let rb2 = Arc::clone(&rb);
        let reader = thread::spawn(move || {
            let mut out = [0u8; 4];
            rb2.read(&mut out, Duration::from_secs(5))
        });
        thread::sleep(Duration::from_millis(30));
        rb.abort_read();
        assert_eq!(reader.join().expect("reader panicked"), TransferOutcome::Aborted);

        // Aborted side stays failed until reset.
        let mut out = [0u8; 4];
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::Aborted);
        rb.reset();
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::TimedOut);
    }

    #[test]
    fn writer_finished_drains_then_ends_stream() {
        let rb = RingBuffer::new("test", 8);
        assert_eq!(rb.write(&[1, 2, 3], SHORT), TransferOutcome::Delivered(3));
        rb.signal_writer_finished();
        assert!(rb.is_writer_finished());

        assert_eq!(rb.write(&[4], SHORT), TransferOutcome::StreamEnded);

        let mut out = [0u8; 8];
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::Delivered(3));
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::StreamEnded);
    }

    #[test]
    fn unblock_reader_returns_zero_without_error() {
        let rb = Arc::new(RingBuffer::new("test", 4));
        let rb2 = Arc::clone(&rb);
        let reader = thread::spawn(move || {
            let mut out = [0u8; 4];
            rb2.read(&mut out, Duration::from_secs(5))
        });
        thread::sleep(Duration::from_millis(30));
        rb.unblock_reader();
        assert_eq!(reader.join().expect("reader panicked"), TransferOutcome::Delivered(0));

        // The unblock request is consumed; buffered data is still readable.
        assert_eq!(rb.write(&[9], SHORT), TransferOutcome::Delivered(1));
        let mut out = [0u8; 4];
        assert_eq!(rb.read(&mut out, SHORT), TransferOutcome::Delivered(1));
        assert_eq!(out[0], 9);
    }

    #[test]
    fn threaded_transfer_preserves_byte_order() {
        let rb = Arc::new(RingBuffer::new("test", 64));
        let rb2 = Arc::clone(&rb);
        let total: usize = 4096;

        let writer = thread::spawn(move || {
            let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
            let mut sent = 0;
            while sent < total {
                match rb2.write(&data[sent..], Duration::from_secs(1)) {
                    TransferOutcome::Delivered(n) => sent += n,
                    other => panic!("unexpected write outcome: {:?}", other),
                }
            }
            rb2.signal_writer_finished();
        });

        let mut received = Vec::with_capacity(total);
        let mut chunk = [0u8; 23];
        loop {
            match rb.read(&mut chunk, Duration::from_secs(1)) {
                TransferOutcome::Delivered(n) => received.extend_from_slice(&chunk[..n]),
                TransferOutcome::StreamEnded => break,
                other => panic!("unexpected read outcome: {:?}", other),
            }
        }
        writer.join().expect("writer panicked");

        assert_eq!(received.len(), total);
        assert!(received.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
    }
}
