//! alpr-stage - License-plate recognition stage
//!
//! Submits inbound image work units to an ALPR engine, logs the plates it
//! finds, and routes each unit to `success` or `failure`.

pub mod config;
pub mod engine;
pub mod error;
pub mod routing;
pub mod stage;

pub use config::{EngineConfig, StageConfig};
pub use engine::{
    AlprEngine, EngineFactory, EngineHandle, PlateCandidate, PlateGroup, RecognitionResult,
    ReplayEngineFactory,
};
pub use error::{EngineError, ImageOrigin, StageError, StageErrorKind};
pub use routing::{ChannelRouter, Outcome, Relationship, RoutedReceivers, Router, WorkUnit};
pub use stage::{Activation, ActivationStats, RecognitionStage};
