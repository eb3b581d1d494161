//! Detection clip capture (SPEC_FULL §4.6).
//!
//! Grounded on the teacher's `AudioCapture`/ring-to-WAV path
//! (`dictum-core/src/audio/mod.rs` writes captured PCM out via `hound` for
//! its debug-dump feature) generalized into a per-detection pre-roll +
//! post-roll clip writer. The source ring already holds `pre_roll +
//! post_roll` worth of audio by the time a detection is confirmed (the ring
//! is sized for at least `clip_capture_duration`, SPEC_FULL §4.1), so a clip
//! is just a timed snapshot written to disk.

pub mod codec;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::ClipSettings;
use crate::error::{BirdnetError, Result};
use crate::ring::RingBuffer;

pub use codec::ClipCodec;

/// Writes WAV clips for confirmed detections. Holds no ring state of its
/// own — the caller (postfilter/supervisor) hands it the source's
/// `RingBuffer` at the moment a clip is due.
pub struct ClipWriter {
    settings: ClipSettings,
}

impl ClipWriter {
    pub fn new(settings: ClipSettings) -> Self {
        Self { settings }
    }

    pub fn should_capture(&self, species_code: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }
        match &self.settings.species_allowlist {
            None => true,
            Some(allow) => allow.iter().any(|s| s == species_code),
        }
    }

    /// Waits out the configured post-roll, then snapshots the trailing
    /// `pre_roll + post_roll` audio from `ring` and writes it to disk.
    /// Returns the clip's path relative to `base_path`, suitable for
    /// `Detection::clip_path`, laid out per SPEC_FULL §4.6/§6 as
    /// `<date>/<species_code>/<timestamp>_<confidence*100>.<ext>`.
    pub async fn capture(
        &self,
        ring: &RingBuffer,
        sample_rate: u32,
        source_id: &str,
        species_code: &str,
        confidence: f32,
        detected_at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        if !self.settings.codec.is_supported() {
            return Err(BirdnetError::UnsupportedCodec(self.settings.codec));
        }

        tokio::time::sleep(self.settings.post_roll).await;

        let span = self.settings.pre_roll + self.settings.post_roll;
        let pcm = ring.snapshot(span);
        if pcm.is_empty() {
            warn!(source_id, species_code, "clip capture found no audio in ring");
        }

        let rel_path = PathBuf::from(detected_at.format("%Y-%m-%d").to_string())
            .join(species_code)
            .join(format!(
                "{}_{}.{}",
                detected_at.format("%Y%m%dT%H%M%S%.3fZ"),
                (confidence * 100.0).round() as i64,
                self.settings.codec.extension()
            ));
        let full_path = self.settings.base_path.join(&rel_path);

        let write_path = full_path.clone();
        tokio::task::spawn_blocking(move || write_wav(&write_path, &pcm, sample_rate))
            .await
            .map_err(|e| BirdnetError::Other(e.into()))??;

        debug!(path = ?full_path, "clip written");
        Ok(rel_path)
    }
}

fn write_wav(path: &std::path::Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| BirdnetError::Other(e.into()))?;
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        writer
            .write_sample(sample)
            .map_err(|e| BirdnetError::Other(e.into()))?;
    }
    writer.finalize().map_err(|e| BirdnetError::Other(e.into()))?;
    Ok(())
}

/// Minimum ring capture span a `ClipSettings` requires, used when sizing a
/// source's ring (SPEC_FULL §4.1).
pub fn capture_duration(settings: &ClipSettings) -> Duration {
    settings.pre_roll + settings.post_roll
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(codec: ClipCodec, base: &std::path::Path) -> ClipSettings {
        ClipSettings {
            enabled: true,
            base_path: base.to_path_buf(),
            pre_roll: Duration::from_millis(50),
            post_roll: Duration::from_millis(10),
            codec,
            species_allowlist: None,
            queue_capacity: 4,
        }
    }

    #[test]
    fn should_capture_respects_allowlist() {
        let dir = std::env::temp_dir();
        let mut s = settings(ClipCodec::Wav, &dir);
        s.species_allowlist = Some(vec!["amerob".into()]);
        let writer = ClipWriter::new(s);
        assert!(writer.should_capture("amerob"));
        assert!(!writer.should_capture("comrav"));
    }

    #[tokio::test]
    async fn capture_writes_a_readable_wav_file() {
        let dir = std::env::temp_dir().join(format!("birdnet-clip-test-{}", std::process::id()));
        let ring = RingBuffer::new(4096, 8_000);
        let writer_handle = ring.writer();
        let samples: Vec<u8> = (0..200u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
        writer_handle.write(&samples);

        let writer = ClipWriter::new(settings(ClipCodec::Wav, &dir));
        let detected_at = Utc::now();
        let rel = writer
            .capture(&ring, 8_000, "mic0", "amerob", 0.873, detected_at)
            .await
            .expect("capture succeeds");

        // <date>/<species_code>/<timestamp>_<confidence*100>.<ext> (SPEC_FULL §4.6/§6).
        assert_eq!(
            rel,
            PathBuf::from(detected_at.format("%Y-%m-%d").to_string())
                .join("amerob")
                .join(format!("{}_87.wav", detected_at.format("%Y%m%dT%H%M%S%.3fZ")))
        );

        let full = dir.join(&rel);
        assert!(full.exists());
        let reader = hound::WavReader::open(&full).expect("valid wav");
        assert_eq!(reader.spec().channels, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unsupported_codec_errors_immediately() {
        let dir = std::env::temp_dir();
        let ring = RingBuffer::new(1024, 8_000);
        let writer = ClipWriter::new(settings(ClipCodec::Flac, &dir));
        let result = writer
            .capture(&ring, 8_000, "mic0", "amerob", 0.9, Utc::now())
            .await;
        assert!(matches!(result, Err(BirdnetError::UnsupportedCodec(ClipCodec::Flac))));
    }
}
