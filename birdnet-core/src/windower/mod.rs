//! Fixed-stride windowing (SPEC_FULL §4.3).
//!
//! Generalizes the teacher's `append_rolling_samples`/`retain_tail_samples`
//! rolling-buffer bookkeeping (`dictum-core/src/engine/pipeline.rs`) from
//! VAD-triggered variable-length windows to fixed-stride, fixed-duration
//! windows read straight off a [`crate::ring::ReadCursor`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::config::WindowSettings;
use crate::model::AudioFrame;
use crate::queue::DropOldestQueue;
use crate::ring::ReadCursor;

const BYTES_PER_SAMPLE: usize = 2;

/// Counters surfaced on the Prometheus sink and used by the §8 invariant
/// `frames_produced = floor((bytes_written - window_bytes) / stride_bytes) + 1 - inference_lag_drops`.
#[derive(Default)]
pub struct WindowerDiagnostics {
    pub frames_emitted: AtomicU64,
    pub lag_resets: AtomicU64,
}

impl WindowerDiagnostics {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.frames_emitted.load(Ordering::Relaxed),
            self.lag_resets.load(Ordering::Relaxed),
        )
    }
}

/// Extracts fixed-duration, fixed-stride `AudioFrame`s from one source's
/// ring buffer. The first frame is emitted once `window_duration` worth of
/// audio is available; subsequent frames advance by `stride = window -
/// overlap`. Frames are pushed into a bounded, per-source drop-oldest queue
/// of capacity `frame_queue_capacity` (SPEC_FULL §4.3).
pub struct Windower {
    source_id: String,
    sample_rate: u32,
    window_bytes: usize,
    stride_bytes: usize,
    seq: u64,
    accum: Vec<u8>,
    /// Wall-clock time corresponding to byte offset 0 of `accum`'s window
    /// start, anchored once at first read and advanced by stride.
    anchor_wall: Option<SystemTime>,
    anchor_bytes_consumed: u64,
}

impl Windower {
    pub fn new(source_id: String, settings: &WindowSettings) -> Self {
        let sample_rate = settings.sample_rate;
        let window_bytes =
            (settings.window_duration.as_secs_f64() * sample_rate as f64) as usize * BYTES_PER_SAMPLE;
        let overlap_bytes =
            (settings.overlap.as_secs_f64() * sample_rate as f64) as usize * BYTES_PER_SAMPLE;
        let stride_bytes = window_bytes.saturating_sub(overlap_bytes).max(BYTES_PER_SAMPLE);
        Self {
            source_id,
            sample_rate,
            window_bytes,
            stride_bytes,
            seq: 0,
            accum: Vec::with_capacity(window_bytes * 2),
            anchor_wall: None,
            anchor_bytes_consumed: 0,
        }
    }

    fn wall_start_for(&self, bytes_into_stream: u64) -> SystemTime {
        let Some(anchor) = self.anchor_wall else {
            return SystemTime::now();
        };
        let elapsed_samples = bytes_into_stream.saturating_sub(self.anchor_bytes_consumed)
            / BYTES_PER_SAMPLE as u64;
        anchor + Duration::from_secs_f64(elapsed_samples as f64 / self.sample_rate as f64)
    }

    /// Run until `cancel` fires: poll the ring cursor, accumulate bytes, emit
    /// frames at each stride boundary into `out`.
    pub async fn run(
        mut self,
        mut cursor: ReadCursor,
        out: Arc<DropOldestQueue<AudioFrame>>,
        diagnostics: Arc<WindowerDiagnostics>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        debug!(source = %self.source_id, "windower started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let result = cursor.read();
            if let Some(skip) = result.lag_reset {
                warn!(source = %self.source_id, skip, "ring reader lag reset");
                diagnostics.lag_resets.fetch_add(1, Ordering::Relaxed);
                // A resync invalidates any partial window we were building.
                self.accum.clear();
                self.anchor_wall = None;
            }
            if self.anchor_wall.is_none() && !result.bytes.is_empty() {
                self.anchor_wall = Some(SystemTime::now());
                self.anchor_bytes_consumed = cursor.position() - result.bytes.len() as u64;
            }
            self.accum.extend_from_slice(&result.bytes);

            while self.accum.len() >= self.window_bytes {
                let frame_bytes = self.accum[..self.window_bytes].to_vec();
                self.seq += 1;
                let bytes_into_stream =
                    cursor.position() - (self.accum.len() - self.window_bytes) as u64
                        - self.window_bytes as u64;
                let frame = AudioFrame {
                    source_id: self.source_id.clone(),
                    seq: self.seq,
                    monotonic_start: std::time::Instant::now(),
                    wall_start: self.wall_start_for(bytes_into_stream),
                    sample_rate: self.sample_rate,
                    channels: 1,
                    pcm: frame_bytes,
                };
                if out.push(frame) {
                    debug!(source = %self.source_id, "inference lag drop (queue full)");
                }
                diagnostics.frames_emitted.fetch_add(1, Ordering::Relaxed);

                if self.stride_bytes >= self.accum.len() {
                    self.accum.clear();
                } else {
                    self.accum.drain(..self.stride_bytes);
                }
            }

            if result.bytes.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        debug!(source = %self.source_id, "windower stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingBuffer;

    fn settings(rate: u32, window_secs: f64, overlap_secs: f64) -> WindowSettings {
        WindowSettings {
            sample_rate: rate,
            window_duration: Duration::from_secs_f64(window_secs),
            overlap: Duration::from_secs_f64(overlap_secs),
            frame_queue_capacity: 2,
        }
    }

    #[tokio::test]
    async fn emits_one_frame_per_full_window_with_no_overlap() {
        let rate = 8; // tiny rate keeps the test fast and exact
        let ring = RingBuffer::new(1024, rate);
        let writer = ring.writer();
        let cursor = ring.reader();

        // 3 windows worth of samples (window = 2s = 16 samples = 32 bytes)
        let samples: Vec<u8> = (0..16 * 3u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
        writer.write(&samples);

        let windower = Windower::new("src0".into(), &settings(rate, 2.0, 0.0));
        let out = Arc::new(DropOldestQueue::new(16));
        let diagnostics = Arc::new(WindowerDiagnostics::default());
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel2 = cancel.clone();

        let out2 = out.clone();
        let handle = tokio::spawn(windower.run(cursor, out2, diagnostics.clone(), cancel2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(out.len(), 3);
        let (emitted, _) = diagnostics.snapshot();
        assert_eq!(emitted, 3);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_lag() {
        let rate = 8;
        let ring = RingBuffer::new(1024, rate);
        let writer = ring.writer();
        let cursor = ring.reader();
        let samples: Vec<u8> = (0..16 * 5u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
        writer.write(&samples);

        let windower = Windower::new("src0".into(), &settings(rate, 2.0, 0.0));
        let out = Arc::new(DropOldestQueue::new(2));
        let diagnostics = Arc::new(WindowerDiagnostics::default());
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel2 = cancel.clone();
        let out2 = out.clone();
        let handle = tokio::spawn(windower.run(cursor, out2, diagnostics, cancel2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(out.len(), 2);
        assert!(out.dropped_total() >= 1);
    }
}
