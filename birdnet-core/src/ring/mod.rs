//! Per-source lock-free-ish PCM ring buffer (SPEC_FULL §3 / §4.1).
//!
//! The teacher crate's ring (`dictum-core/src/buffering/mod.rs`) wraps
//! `ringbuf::HeapRb<f32>` split into a single producer/single consumer pair.
//! That shape cannot express this pipeline's contract: one writer, an
//! arbitrary number of independent non-destructive readers (the windower
//! and the clip-writer snapshotter read the same source concurrently), byte
//! granularity (S16LE, not `f32`), a `dropped_total` counter, and reader
//! lag-reset semantics. `RingBuffer` reimplements the same role — a fixed
//! capacity byte ring a capture thread writes into without blocking — over
//! a `parking_lot::Mutex`-guarded buffer plus atomic write-position/drop
//! counters, so any number of `ReadCursor`s can track the same ring
//! independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

const BYTES_PER_SAMPLE: usize = 2;

struct RingInner {
    buf: Mutex<Box<[u8]>>,
    capacity: usize,
    /// Total bytes ever written. The ring holds bytes in
    /// `[total_written - capacity, total_written)` once it has wrapped.
    total_written: AtomicU64,
    dropped_total: AtomicU64,
    sample_rate: u32,
}

/// Handle used by the `Source` adapter to write captured audio. Never
/// blocks: on overflow the oldest bytes are overwritten and `dropped_total`
/// advances.
#[derive(Clone)]
pub struct RingWriter {
    inner: Arc<RingInner>,
}

impl RingWriter {
    /// Write PCM bytes into the ring. `bytes.len()` must be a multiple of
    /// `BYTES_PER_SAMPLE`; the caller (a `Source` adapter) only ever hands
    /// whole samples across.
    pub fn write(&self, bytes: &[u8]) -> usize {
        debug_assert_eq!(bytes.len() % BYTES_PER_SAMPLE, 0, "torn sample write");
        if bytes.is_empty() {
            return 0;
        }

        let cap = self.inner.capacity;
        let mut buf = self.inner.buf.lock();
        let start = self.inner.total_written.load(Ordering::Relaxed) as usize;
        let new_total = start as u64 + bytes.len() as u64;

        if bytes.len() >= cap {
            // Entire ring is overwritten; keep only the tail that fits, laid
            // out so physical offset `(new_total - cap) % cap` holds its
            // first byte — readers and `snapshot` both index storage that
            // way, not from offset 0.
            let tail = &bytes[bytes.len() - cap..];
            let pos = ((new_total - cap as u64) % cap as u64) as usize;
            let first_len = (cap - pos).min(tail.len());
            buf[pos..pos + first_len].copy_from_slice(&tail[..first_len]);
            if first_len < tail.len() {
                let rest = &tail[first_len..];
                buf[..rest.len()].copy_from_slice(rest);
            }
        } else {
            let pos = start % cap;
            let first_len = (cap - pos).min(bytes.len());
            buf[pos..pos + first_len].copy_from_slice(&bytes[..first_len]);
            if first_len < bytes.len() {
                let rest = &bytes[first_len..];
                buf[..rest.len()].copy_from_slice(rest);
            }
        }
        drop(buf);

        self.inner.total_written.store(new_total, Ordering::Release);

        // The oldest recoverable position ("floor") advances by exactly the
        // number of bytes this write pushed out of the capacity window;
        // that's how many bytes became unrecoverable as a result of it.
        let floor_before = (start as u64).saturating_sub(cap as u64);
        let floor_after = new_total.saturating_sub(cap as u64);
        let newly_dropped = floor_after.saturating_sub(floor_before);
        if newly_dropped > 0 {
            self.inner
                .dropped_total
                .fetch_add(newly_dropped, Ordering::Relaxed);
        }

        bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }
}

/// Non-destructive cursor into a ring. Multiple cursors may track the same
/// ring independently; none of them advance the writer's tail.
pub struct ReadCursor {
    inner: Arc<RingInner>,
    /// Byte offset into the infinite stream this cursor has consumed up to.
    position: u64,
}

/// Result of a `ReadCursor::read` call.
pub struct ReadResult {
    pub bytes: Vec<u8>,
    /// Set if the reader had fallen behind far enough that bytes it had not
    /// yet consumed were overwritten; the cursor was force-advanced to the
    /// oldest still-available position. Carries the skip magnitude.
    pub lag_reset: Option<u64>,
}

impl ReadCursor {
    /// Read all bytes available since this cursor's last read, advancing
    /// it. Always returns a whole number of samples.
    pub fn read(&mut self) -> ReadResult {
        let total_written = self.inner.total_written.load(Ordering::Acquire);
        let cap = self.inner.capacity as u64;
        let oldest_available = total_written.saturating_sub(cap);

        let mut lag_reset = None;
        if self.position < oldest_available {
            lag_reset = Some(oldest_available - self.position);
            self.position = oldest_available;
        }

        let available = total_written - self.position;
        // Round down to whole samples.
        let available = (available / BYTES_PER_SAMPLE as u64) * BYTES_PER_SAMPLE as u64;
        if available == 0 {
            return ReadResult {
                bytes: Vec::new(),
                lag_reset,
            };
        }

        let buf = self.inner.buf.lock();
        let start_pos = (self.position % cap) as usize;
        let mut out = Vec::with_capacity(available as usize);
        let avail = available as usize;
        let first_len = (self.inner.capacity - start_pos).min(avail);
        out.extend_from_slice(&buf[start_pos..start_pos + first_len]);
        if first_len < avail {
            out.extend_from_slice(&buf[..avail - first_len]);
        }
        drop(buf);

        self.position += available;
        ReadResult {
            bytes: out,
            lag_reset,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Single-writer, multi-reader byte ring of fixed capacity (SPEC_FULL §4.1).
///
/// Cheaply `Clone`: every clone shares the same underlying buffer, so the
/// supervisor can hand one handle to the silence watchdog and another to the
/// clip manager without either owning the ring exclusively.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingInner>,
}

impl RingBuffer {
    /// `capacity_bytes` should be sized per source as
    /// `max(window_duration, clip_capture_duration) * sample_rate *
    /// bytes_per_sample * safety_factor` (SPEC_FULL §4.1), rounded up to an
    /// even number of bytes.
    pub fn new(capacity_bytes: usize, sample_rate: u32) -> Self {
        let capacity = capacity_bytes + (capacity_bytes % BYTES_PER_SAMPLE);
        Self {
            inner: Arc::new(RingInner {
                buf: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
                capacity,
                total_written: AtomicU64::new(0),
                dropped_total: AtomicU64::new(0),
                sample_rate,
            }),
        }
    }

    pub fn writer(&self) -> RingWriter {
        RingWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// A cursor starting at the oldest byte currently available.
    pub fn reader(&self) -> ReadCursor {
        let total_written = self.inner.total_written.load(Ordering::Acquire);
        let cap = self.inner.capacity as u64;
        ReadCursor {
            inner: Arc::clone(&self.inner),
            position: total_written.saturating_sub(cap),
        }
    }

    /// A cursor starting at an explicit stream position (used to resume a
    /// previously observed cursor).
    pub fn reader_at(&self, position: u64) -> ReadCursor {
        ReadCursor {
            inner: Arc::clone(&self.inner),
            position,
        }
    }

    /// Non-destructive copy of the trailing `duration` worth of audio,
    /// clamped to what is actually available (SPEC_FULL §4.1, used by the
    /// clip writer).
    pub fn snapshot(&self, duration: Duration) -> Vec<u8> {
        let wanted_samples =
            (duration.as_secs_f64() * self.inner.sample_rate as f64).round() as u64;
        let wanted_bytes = wanted_samples * BYTES_PER_SAMPLE as u64;

        let total_written = self.inner.total_written.load(Ordering::Acquire);
        let cap = self.inner.capacity as u64;
        let available_bytes = total_written.min(cap);
        let take = wanted_bytes.min(available_bytes) as usize;
        if take == 0 {
            return Vec::new();
        }

        let buf = self.inner.buf.lock();
        let start = (total_written - take as u64) % cap;
        let mut out = Vec::with_capacity(take);
        let first_len = (self.inner.capacity - start as usize).min(take);
        out.extend_from_slice(&buf[start as usize..start as usize + first_len]);
        if first_len < take {
            out.extend_from_slice(&buf[..take - first_len]);
        }
        out
    }

    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn total_written(&self) -> u64 {
        self.inner.total_written.load(Ordering::Acquire)
    }
}

/// Computes the minimum ring capacity in bytes for a source, per SPEC_FULL
/// §4.1: `max(window_duration, clip_capture_duration) * sample_rate *
/// bytes_per_sample * safety_factor`.
pub fn required_capacity_bytes(
    window_duration: Duration,
    clip_capture_duration: Duration,
    sample_rate: u32,
    safety_factor: u32,
) -> usize {
    let duration = window_duration.max(clip_capture_duration);
    let samples = (duration.as_secs_f64() * sample_rate as f64).ceil() as u64;
    (samples * BYTES_PER_SAMPLE as u64 * safety_factor as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: u16) -> Vec<u8> {
        (0..n).flat_map(|i| (i as i16).to_le_bytes()).collect()
    }

    #[test]
    fn write_then_read_round_trips_exactly_when_under_capacity() {
        let ring = RingBuffer::new(1024, 48_000);
        let writer = ring.writer();
        let mut reader = ring.reader();

        let data = samples(10);
        writer.write(&data);
        let result = reader.read();
        assert_eq!(result.bytes, data);
        assert!(result.lag_reset.is_none());
        assert_eq!(ring.dropped_total(), 0);
    }

    #[test]
    fn reads_never_return_odd_byte_counts() {
        let ring = RingBuffer::new(16, 48_000);
        let writer = ring.writer();
        let mut reader = ring.reader();
        writer.write(&[1, 2, 3]); // 1.5 samples worth
        let result = reader.read();
        assert_eq!(result.bytes.len() % 2, 0);
    }

    #[test]
    fn overflow_increments_dropped_total_and_forces_reader_resync() {
        let ring = RingBuffer::new(8, 48_000); // 4 samples capacity
        let writer = ring.writer();
        let mut reader = ring.reader();

        writer.write(&samples(4));
        let _ = reader.read(); // catch up

        // Overflow the ring entirely without the reader consuming.
        writer.write(&samples(10));
        assert!(ring.dropped_total() > 0);

        let result = reader.read();
        assert!(result.lag_reset.is_some());
        // After resync the reader should only see the last 4 samples (8 bytes),
        // in order — samples 6,7,8,9 of the second write, not scrambled by the
        // overflow fast path's physical-offset handling.
        assert_eq!(result.bytes.len(), 8);
        let expected: Vec<u8> = (6..10u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
        assert_eq!(result.bytes, expected);
    }

    #[test]
    fn snapshot_clamps_to_available_audio() {
        let ring = RingBuffer::new(8, 4); // 4 samples capacity at 4 Hz
        let writer = ring.writer();
        writer.write(&samples(2));
        let snap = ring.snapshot(Duration::from_secs(10));
        assert_eq!(snap.len(), 4); // only 2 samples (4 bytes) were ever written... clamped
    }

    #[test]
    fn required_capacity_uses_larger_of_window_and_clip_duration_times_safety_factor() {
        let bytes = required_capacity_bytes(
            Duration::from_secs(3),
            Duration::from_secs(5),
            48_000,
            3,
        );
        // max(3,5)=5s * 48000 * 2 bytes * 3 = 1,440,000
        assert_eq!(bytes, 5 * 48_000 * 2 * 3);
    }
}
