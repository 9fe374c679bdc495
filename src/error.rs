//! Error types for the recognition stage
//!
//! Activation-scoped errors (`ConfigValidation`, `EngineInit`) stop an
//! activation before any unit is processed. Unit-scoped errors (`ImageRead`,
//! `Recognition`) route a single unit to `failure`.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::StageConfig;

/// Coarse classification of a [`StageError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageErrorKind {
    ConfigValidation,
    EngineInit,
    ImageRead,
    Recognition,
}

impl StageErrorKind {
    /// Whether an error of this kind ends the whole activation
    pub fn is_activation_scoped(&self) -> bool {
        matches!(self, Self::ConfigValidation | Self::EngineInit)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(
        "invalid configuration for '{}' ({field}): {reason}",
        StageConfig::describe_field(.field)
    )]
    ConfigValidation { field: &'static str, reason: String },

    #[error("failed to initialize ALPR engine: {source}")]
    EngineInit {
        #[source]
        source: EngineError,
    },

    #[error("failed to read image bytes from {origin}: {reason}")]
    ImageRead { origin: ImageOrigin, reason: String },

    #[error("recognition failed: {source}")]
    Recognition {
        #[source]
        source: EngineError,
    },
}

impl StageError {
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field,
            reason: reason.into(),
        }
    }

    pub fn image_read(origin: ImageOrigin, reason: impl Into<String>) -> Self {
        Self::ImageRead {
            origin,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> StageErrorKind {
        match self {
            Self::ConfigValidation { .. } => StageErrorKind::ConfigValidation,
            Self::EngineInit { .. } => StageErrorKind::EngineInit,
            Self::ImageRead { .. } => StageErrorKind::ImageRead,
            Self::Recognition { .. } => StageErrorKind::Recognition,
        }
    }
}

/// Where the image bytes of a unit were taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// The content of the work unit itself
    WorkUnit,
    /// The test-only override file
    Override(PathBuf),
}

impl std::fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkUnit => f.write_str("work unit content"),
            Self::Override(path) => write!(f, "override file {}", path.display()),
        }
    }
}

/// Errors raised by an ALPR engine backend
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine configuration file not found: {}", .0.display())]
    ConfigFileMissing(PathBuf),

    #[error("engine runtime data directory not found: {}", .0.display())]
    RuntimeDataMissing(PathBuf),

    #[error("engine rejected {setting} '{value}'")]
    Rejected { setting: &'static str, value: String },

    #[error("engine returned a malformed result: {0}")]
    MalformedResult(String),

    #[error("engine call timed out after {0} ms")]
    TimedOut(u64),

    #[error("engine panicked: {0}")]
    Panicked(String),

    #[error("backend error: {message}")]
    Backend { message: String },
}

impl EngineError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResult(message.into())
    }
}
