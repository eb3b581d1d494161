//! Classifier abstraction and the fixed worker pool that batches frames
//! through it (SPEC_FULL §4.4).
//!
//! Grounded on the teacher's `SpeechModel` trait / `ModelHandle`
//! (`dictum-core/src/inference/mod.rs`): `&mut self` on the classify method
//! expresses that a loaded model session is stateful (ONNX Runtime session
//! handles, tensor scratch buffers), and all mutation is serialized through
//! a `parking_lot::Mutex` inside `ClassifierHandle`.

pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxClassifier, OnnxClassifierConfig};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::Result;
use crate::model::{Prediction, SpeciesScore};
use crate::queue::DropOldestQueue;
use crate::AudioFrame;

/// Contract for bird-species classifier backends. The classifier expects
/// f32 samples in `[-1, 1]`; conversion from the frame's owned S16LE bytes
/// happens in the worker (SPEC_FULL §4.4), not in the backend.
pub trait Classifier: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference to populate
    /// caches. Failure here is `classifier_load_failed` and is escalated to
    /// the supervisor at startup (SPEC_FULL §7).
    fn warm_up(&mut self) -> Result<()>;

    /// Run inference over one frame's worth of normalized samples, yielding
    /// `(label, confidence)` pairs and (if the backend has a voice-presence
    /// head) a human-voice probability for the privacy filter.
    fn classify(&mut self, samples: &[f32], sample_rate: u32) -> Result<ClassifierOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierOutput {
    pub scores: Vec<SpeciesScore>,
    pub voice_presence: Option<f32>,
}

/// Thread-safe reference-counted handle to any `Classifier` implementor.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn Classifier>>);

impl ClassifierHandle {
    pub fn new<C: Classifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct InferenceDiagnostics {
    pub inference_calls: AtomicU64,
    pub inference_errors: AtomicU64,
    pub frames_dropped_on_error: AtomicU64,
    pub inference_seconds_total: Mutex<Vec<f64>>,
}

impl InferenceDiagnostics {
    pub fn record_duration(&self, secs: f64) {
        self.inference_seconds_total.lock().push(secs);
    }
}

/// One fixed-size worker: pulls frames off the shared queue in strict
/// per-source sequence order is guaranteed upstream by the windower (each
/// source has exactly one producer task); workers just drain FIFO and run
/// inference. Transient errors are retried once (SPEC_FULL §4.4); a second
/// failure drops the frame and is reported by the caller as a
/// `classifier_error` `SystemEvent`.
pub async fn worker_loop(
    worker_id: usize,
    queue: Arc<DropOldestQueue<AudioFrame>>,
    classifier: ClassifierHandle,
    out: tokio::sync::mpsc::Sender<Prediction>,
    diagnostics: Arc<InferenceDiagnostics>,
    on_classifier_error: Arc<dyn Fn(String) + Send + Sync>,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = queue.pop() => frame,
        };

        let samples = frame.to_f32_samples();
        let started = Instant::now();
        let result = run_with_one_retry(&classifier, &samples, frame.sample_rate);
        diagnostics
            .inference_calls
            .fetch_add(1, Ordering::Relaxed);
        diagnostics.record_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                let prediction = Prediction {
                    source_id: frame.source_id.clone(),
                    frame_seq: frame.seq,
                    window_start: frame.wall_start,
                    window_end: frame.wall_start
                        + std::time::Duration::from_secs_f64(frame.duration_secs()),
                    scores: output.scores,
                    voice_presence: output.voice_presence,
                };
                if out.send(prediction).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                diagnostics
                    .inference_errors
                    .fetch_add(1, Ordering::Relaxed);
                diagnostics
                    .frames_dropped_on_error
                    .fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, source = %frame.source_id, error = %e, "classifier error, frame dropped");
                on_classifier_error(e.to_string());
            }
        }
    }
}

fn run_with_one_retry(
    classifier: &ClassifierHandle,
    samples: &[f32],
    sample_rate: u32,
) -> Result<ClassifierOutput> {
    let attempt = classifier.0.lock().classify(samples, sample_rate);
    match attempt {
        Ok(out) => Ok(out),
        Err(first_err) => {
            error!(error = %first_err, "classifier error, retrying once");
            classifier.0.lock().classify(samples, sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Instant as StdInstant, SystemTime};

    struct FlakyOnceClassifier {
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for FlakyOnceClassifier {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn classify(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<ClassifierOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(crate::error::BirdnetError::ClassifierError("boom".into()))
            } else {
                Ok(ClassifierOutput {
                    scores: vec![SpeciesScore {
                        scientific_name: "Turdus migratorius".into(),
                        common_name: "American Robin".into(),
                        species_code: "amerob".into(),
                        confidence: 0.9,
                    }],
                    voice_presence: None,
                })
            }
        }
    }

    #[tokio::test]
    async fn worker_retries_once_and_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = ClassifierHandle::new(FlakyOnceClassifier {
            calls: calls.clone(),
        });
        let queue = Arc::new(DropOldestQueue::new(4));
        queue.push(AudioFrame {
            source_id: "s0".into(),
            seq: 1,
            monotonic_start: StdInstant::now(),
            wall_start: SystemTime::now(),
            sample_rate: 48_000,
            channels: 1,
            pcm: vec![0u8; 100],
        });
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let diagnostics = Arc::new(InferenceDiagnostics::default());
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel2 = cancel.clone();
        let queue2 = queue.clone();
        let handle = tokio::spawn(worker_loop(
            0,
            queue2,
            classifier,
            tx,
            diagnostics,
            Arc::new(|_| {}),
            cancel2,
        ));

        let prediction = rx.recv().await.expect("prediction");
        assert_eq!(prediction.scores[0].scientific_name, "Turdus migratorius");
        cancel.cancel();
        let _ = handle.await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
