//! `StubClassifier` — deterministic placeholder backend.
//!
//! Continuation of the teacher's `StubModel` (`dictum-core/src/inference/stub.rs`):
//! before a real TFLite/ONNX bird classifier is wired in, this lets the full
//! pipeline (windower → inferencer → postfilter → bus → sinks) be exercised
//! end to end with a scripted, deterministic output.

use tracing::debug;

use super::{Classifier, ClassifierOutput};
use crate::error::Result;
use crate::model::SpeciesScore;

/// Emits a fixed species label at an energy-derived confidence so tests and
/// local runs can exercise the full pipeline without a model file on disk.
pub struct StubClassifier {
    scientific_name: String,
    common_name: String,
    species_code: String,
    calls: u64,
}

impl StubClassifier {
    pub fn new(scientific_name: impl Into<String>, common_name: impl Into<String>, species_code: impl Into<String>) -> Self {
        Self {
            scientific_name: scientific_name.into(),
            common_name: common_name.into(),
            species_code: species_code.into(),
            calls: 0,
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new("Turdus migratorius", "American Robin", "amerob")
    }
}

impl Classifier for StubClassifier {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up — no-op");
        Ok(())
    }

    fn classify(&mut self, samples: &[f32], _sample_rate: u32) -> Result<ClassifierOutput> {
        self.calls += 1;
        if samples.is_empty() {
            return Ok(ClassifierOutput::default());
        }
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let confidence = rms.clamp(0.0, 1.0);
        Ok(ClassifierOutput {
            scores: vec![SpeciesScore {
                scientific_name: self.scientific_name.clone(),
                common_name: self.common_name.clone(),
                species_code: self.species_code.clone(),
                confidence,
            }],
            voice_presence: Some(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_samples_yield_no_scores() {
        let mut c = StubClassifier::default();
        let out = c.classify(&[], 48_000).unwrap();
        assert!(out.scores.is_empty());
    }

    #[test]
    fn louder_samples_yield_higher_confidence() {
        let mut c = StubClassifier::default();
        let quiet = c.classify(&vec![0.01f32; 100], 48_000).unwrap();
        let loud = c.classify(&vec![0.5f32; 100], 48_000).unwrap();
        assert!(loud.scores[0].confidence > quiet.scores[0].confidence);
    }
}
