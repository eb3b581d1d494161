//! # birdnet-core
//!
//! Realtime bird-vocalization detection pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Source(s) ──► RingBuffer ──► Windower ──► Inferencer ──► PostFilter ──► EventBus ──► Sinks
//!   (local /     (per-source    (stride +    (classifier    (species +      (bounded     (DB, MQTT,
//!    rtsp)        byte ring)     overlap)    worker pool)    threshold       fan-out)     BirdWeather,
//!                                                            state machine)               SSE, metrics,
//!                                                                                          clip writer)
//! ```
//!
//! Each stage is an independently schedulable task connected to its neighbor
//! by a bounded queue. `Settings` is built once (see [`config`]) and handed
//! down explicitly; there is no global mutable state.

#![warn(clippy::all)]

pub mod bus;
pub mod clip;
pub mod config;
pub mod error;
pub mod inference;
pub mod model;
pub mod postfilter;
pub mod queue;
pub mod ring;
pub mod sinks;
pub mod source;
pub mod supervisor;
pub mod watchdog;
pub mod windower;
pub use windower::Windower;

pub use config::Settings;
pub use error::{BirdnetError, Result};
pub use model::{AudioFrame, BusEvent, Detection, Prediction, SystemEvent};
pub use supervisor::Supervisor;
