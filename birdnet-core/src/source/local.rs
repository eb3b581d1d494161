//! Local sound-card capture (SPEC_FULL §4.2).
//!
//! Grounded on the teacher crate's `audio::AudioCapture::open_with_preference`
//! (device selection heuristics, `!Send` stream handling via
//! `spawn_blocking`) and `engine::mod.rs`'s device-open handshake over a
//! sync oneshot channel. The teacher's pipeline fed an SPSC ring of `f32`
//! samples straight into VAD; this adapter instead downmixes, resamples to
//! the configured capture rate, encodes to S16LE, and writes into a
//! [`RingWriter`] shared by the windower and clip writer.

#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "audio-cpal")]
use cpal::{SampleFormat, SampleRate, StreamConfig};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BirdnetError, Result};
use crate::ring::RingWriter;
use crate::source::resample::{downmix_to_mono, f32_to_s16le, RateConverter};
use crate::source::{Backoff, Source, SourceStats};

const OPEN_RETRY_BASE: Duration = Duration::from_secs(1);
const OPEN_RETRY_CAP: Duration = Duration::from_secs(30);

/// Re-discovers and scores input devices the way the teacher's
/// `audio::device` module does, preferring a named device, falling back to
/// the system default, then to the best-scoring non-loopback-like device.
#[cfg(feature = "audio-cpal")]
mod device {
    const LOOPBACK_KEYWORDS: &[&str] = &[
        "stereo mix",
        "wave out",
        "what u hear",
        "what you hear",
        "loopback",
        "virtual output",
        "monitor of",
    ];

    pub fn is_loopback_like_name(name: &str) -> bool {
        let lowered = name.trim().to_ascii_lowercase();
        LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
    }

    pub fn mic_preference_score(name: &str) -> i32 {
        let lowered = name.trim().to_ascii_lowercase();
        if is_loopback_like_name(&lowered) {
            -16
        } else {
            8
        }
    }
}

/// Local capture source. `cpal::Stream` is `!Send`, so the stream itself is
/// created and dropped inside the `spawn_blocking` task; this handle only
/// holds the shared `running` flag and stats counters.
pub struct LocalSource {
    id: String,
    device_name: Option<String>,
    target_sample_rate: u32,
    running: Arc<AtomicBool>,
    bytes_written: Arc<AtomicU64>,
    restarts: Arc<AtomicU64>,
    up: Arc<AtomicBool>,
}

impl LocalSource {
    pub fn new(id: String, device_name: Option<String>, target_sample_rate: u32) -> Self {
        Self {
            id,
            device_name,
            target_sample_rate,
            running: Arc::new(AtomicBool::new(false)),
            bytes_written: Arc::new(AtomicU64::new(0)),
            restarts: Arc::new(AtomicU64::new(0)),
            up: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Source for LocalSource {
    #[cfg(feature = "audio-cpal")]
    async fn start(&mut self, sink: RingWriter, cancel: CancellationToken) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut backoff = Backoff::new(OPEN_RETRY_BASE, OPEN_RETRY_CAP);

        // The capture thread's blocking loop only ever reads `running`
        // (it can't poll an async `CancellationToken`); this task bridges
        // the two so a supervisor cancel still stops capture promptly.
        let cancel_running = Arc::clone(&self.running);
        let cancel_watch = cancel.clone();
        tokio::spawn(async move {
            cancel_watch.cancelled().await;
            cancel_running.store(false, Ordering::SeqCst);
        });

        while self.running.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            let (open_tx, open_rx) = oneshot::channel::<Result<()>>();
            let running = Arc::clone(&self.running);
            let up = Arc::clone(&self.up);
            let bytes_written = Arc::clone(&self.bytes_written);
            let device_name = self.device_name.clone();
            let target_rate = self.target_sample_rate;
            let sink = sink.clone();
            let source_id = self.id.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let result = run_capture(
                    device_name.as_deref(),
                    target_rate,
                    sink,
                    Arc::clone(&running),
                    bytes_written,
                );
                match &result {
                    Ok(()) => {
                        let _ = open_tx.send(Ok(()));
                    }
                    Err(e) => {
                        warn!(source_id, error = %e, "local capture failed");
                        let _ = open_tx.send(Err(BirdnetError::AudioDeviceUnavailable(
                            e.to_string(),
                        )));
                    }
                }
            });

            up.store(true, Ordering::SeqCst);
            // Wait for the capture thread to exit (device closed, error, or
            // `stop()` flipped `running` to false).
            let _ = handle.await;
            up.store(false, Ordering::SeqCst);
            drop(open_rx);

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.restarts.fetch_add(1, Ordering::Relaxed);
            let delay = backoff.next_delay();
            warn!(source_id = %self.id, delay_secs = delay.as_secs(), "retrying local capture");
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    #[cfg(not(feature = "audio-cpal"))]
    async fn start(&mut self, _sink: RingWriter, _cancel: CancellationToken) -> Result<()> {
        Err(BirdnetError::AudioDeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }

    async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed) as u32,
            up: self.up.load(Ordering::Relaxed),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Opens the device and runs the cpal stream until `running` goes false or
/// the stream errors. Must run on its own OS thread (`spawn_blocking`):
/// `cpal::Stream` is bound to its creation thread on Windows/macOS.
#[cfg(feature = "audio-cpal")]
fn run_capture(
    preferred_device_name: Option<&str>,
    target_rate: u32,
    sink: RingWriter,
    running: Arc<AtomicBool>,
    bytes_written: Arc<AtomicU64>,
) -> std::result::Result<(), anyhow::Error> {
    let host = cpal::default_host();
    let mut devices: Vec<(String, cpal::Device)> = host
        .input_devices()?
        .enumerate()
        .map(|(idx, d)| {
            let name = d.name().unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            (name, d)
        })
        .collect();
    if devices.is_empty() {
        anyhow::bail!("no input devices available");
    }

    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let preferred_idx = preferred_device_name
        .and_then(|want| devices.iter().position(|(name, _)| name == want));
    let default_idx = default_name
        .as_deref()
        .and_then(|name| devices.iter().position(|(n, _)| n == name));
    let best_idx = devices
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| !device::is_loopback_like_name(name))
        .max_by_key(|(_, (name, _))| device::mic_preference_score(name))
        .map(|(idx, _)| idx);

    let selected_idx = preferred_idx.or(default_idx).or(best_idx).unwrap_or(0);
    let (name, dev) = devices.swap_remove(selected_idx);
    info!(device = %name, "opening local input device");

    let supported = dev.default_input_config()?;
    let capture_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(capture_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut converter = RateConverter::new(capture_rate, target_rate, 1024)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let running_cb = Arc::clone(&running);

    let build_err = |e: cpal::BuildStreamError| anyhow::anyhow!("build stream: {e}");

    macro_rules! make_stream {
        ($ty:ty, $convert:expr) => {
            dev.build_input_stream(
                &config,
                move |data: &[$ty], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let mono: Vec<f32> = downmix_to_mono(&$convert(data), channels);
                    let resampled = converter.process(&mono);
                    let bytes = f32_to_s16le(&resampled);
                    let written = sink.write(&bytes);
                    bytes_written.fetch_add(written as u64, Ordering::Relaxed);
                },
                |err| warn!(error = %err, "audio stream error"),
                None,
            )
        };
    }

    let stream = match supported.sample_format() {
        SampleFormat::F32 => make_stream!(f32, |d: &[f32]| d.to_vec()).map_err(build_err)?,
        SampleFormat::I16 => {
            make_stream!(i16, |d: &[i16]| d.iter().map(|s| *s as f32 / 32768.0).collect())
                .map_err(build_err)?
        }
        SampleFormat::U8 => make_stream!(u8, |d: &[u8]| d
            .iter()
            .map(|s| (*s as f32 - 128.0) / 128.0)
            .collect())
        .map_err(build_err)?,
        fmt => anyhow::bail!("unsupported sample format: {fmt:?}"),
    };

    stream.play()?;
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_source_reports_down_until_started() {
        let source = LocalSource::new("mic0".into(), None, 48_000);
        assert!(!source.stats().up);
        assert_eq!(source.id(), "mic0");
    }
}
