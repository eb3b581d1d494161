//! Source adapters: local capture and RTSP (SPEC_FULL §4.2).
//!
//! Both variants share the polymorphic capability set in [`Source`]: start
//! writing into a [`crate::ring::RingWriter`], stop, and report
//! [`SourceStats`]. Both downmix to mono, resample to the configured
//! capture rate, and write in frames of ≤ 20 ms.

pub mod local;
pub mod resample;
pub mod rtsp;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ring::RingWriter;

/// Liveness/throughput counters for one source, surfaced on the
/// `birdnet_source_up{source}` gauge and used by the supervisor's health
/// aggregation.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub bytes_written: u64,
    pub restarts: u32,
    pub up: bool,
}

#[async_trait]
pub trait Source: Send {
    /// Start writing PCM into `sink`. Runs until `cancel` fires or the
    /// source fails unrecoverably. The supervisor owns the source for the
    /// lifetime of this call and drives shutdown purely through `cancel`
    /// (SPEC_FULL §5's hierarchical cancellation tree), since a spawned
    /// task holding the only `&mut Self` cannot also receive a separate
    /// `stop(&mut self)` call from the outside.
    async fn start(&mut self, sink: RingWriter, cancel: CancellationToken) -> Result<()>;
    /// Graceful stop for callers that retain direct ownership (tests,
    /// non-spawned use) instead of driving shutdown via `cancel`.
    async fn stop(&mut self);
    fn stats(&self) -> SourceStats;
    fn id(&self) -> &str;
}

/// Exponential backoff helper shared by both source adapters: device-open
/// retry (local) and child-transcoder restart (RTSP), both capped at 30 s
/// per SPEC_FULL §4.2.
pub struct Backoff {
    attempt: u32,
    cap: Duration,
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            cap,
            base,
        }
    }

    /// Duration to wait before the next attempt, then advances the
    /// internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(10);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn backoff_resets() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
