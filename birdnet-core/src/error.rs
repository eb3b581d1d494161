use thiserror::Error;

/// All errors produced by birdnet-core.
///
/// Variants map onto the error kinds named in the pipeline's error-handling
/// design: some are recovered locally with retry/backoff, some degrade the
/// pipeline while incrementing a counter, and some escalate to the
/// supervisor for an orderly shutdown. See each component module for which
/// bucket a given error falls into.
#[derive(Debug, Error)]
pub enum BirdnetError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("audio device unavailable: {0}")]
    AudioDeviceUnavailable(String),

    #[error("rtsp stream failed: {0}")]
    RtspStreamFailed(String),

    #[error("classifier failed to load: {0}")]
    ClassifierLoadFailed(String),

    #[error("classifier error: {0}")]
    ClassifierError(String),

    #[error("ring buffer overflow on source {source_id}")]
    RingOverflow { source_id: String },

    #[error("backpressure drop in {stage}")]
    BackpressureDrop { stage: &'static str },

    #[error("persistence error (transient): {0}")]
    PersistenceTransient(String),

    #[error("persistence error (fatal): {0}")]
    PersistenceFatal(String),

    #[error("sink {sink} timed out")]
    SinkTimeout { sink: &'static str },

    #[error("resource {resource} is critical: {value} >= {threshold}")]
    ResourceCritical {
        resource: &'static str,
        value: f64,
        threshold: f64,
    },

    #[error("shutdown deadline exceeded for {stage}")]
    ShutdownDeadlineExceeded { stage: &'static str },

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("unsupported clip codec: {0:?}")]
    UnsupportedCodec(crate::clip::codec::ClipCodec),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BirdnetError>;

/// Tri-state outcome for sink delivery attempts (SPEC_FULL §9): only `Fatal`
/// is escalated to the supervisor, `Retryable` is handled by the sink's own
/// retry policy, and `Ok` clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Ok,
    Retryable,
    Fatal,
}
