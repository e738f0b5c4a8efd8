//! Error Handling Module
//!
//! Defines the error type shared by the training core, the dataset loader and
//! the checkpoint store. Every variant is fatal to a run: the orchestrator
//! wraps failures with the epoch and phase they happened in and aborts.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Phase of an epoch in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Optimisation pass over the training set
    Train,
    /// Inference pass over the held-out set
    Eval,
    /// Best-model decision and persistence
    Checkpoint,
    /// Emitting scalars to the observability sink
    Report,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Eval => write!(f, "eval"),
            Phase::Checkpoint => write!(f, "checkpoint"),
            Phase::Report => write!(f, "report"),
        }
    }
}

/// Main error type for training runs
#[derive(Error, Debug)]
pub enum TrainError {
    /// Invalid or missing configuration option
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resume requested but no usable checkpoint exists
    #[error("Cannot resume: {0}")]
    Resume(String),

    /// Metrics snapshot taken before any sample was observed
    #[error("Metrics snapshot over an empty pass ({batches} batches, 0 samples)")]
    EmptyPass { batches: usize },

    /// Checkpoint write or read failure
    #[error("Checkpoint storage error at '{path}': {message}")]
    Storage { path: PathBuf, message: String },

    /// Batch whose tensors disagree in shape
    #[error("Malformed batch: {0}")]
    BatchShape(String),

    /// Dataset files missing or malformed
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Record absent from storage
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failure inside one epoch of the run
    #[error("Epoch {epoch} failed during {phase}: {source}")]
    Epoch {
        epoch: usize,
        phase: Phase,
        #[source]
        source: Box<TrainError>,
    },
}

impl TrainError {
    /// Build a storage error for the given path
    pub fn storage(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Wrap this error with the epoch and phase it escaped from
    pub fn in_epoch(self, epoch: usize, phase: Phase) -> Self {
        Self::Epoch {
            epoch,
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping epoch context wrappers
    pub fn root(&self) -> &TrainError {
        match self {
            Self::Epoch { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for TrainError {
    fn from(err: serde_json::Error) -> Self {
        TrainError::Serialization(err.to_string())
    }
}

/// Convenience Result type for training operations
pub type Result<T> = std::result::Result<T, TrainError>;

/// Extension trait for tagging foreign errors with the run phase they belong to
pub trait ResultExt<T> {
    /// Attach epoch and phase context to an error
    fn in_epoch(self, epoch: usize, phase: Phase) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn in_epoch(self, epoch: usize, phase: Phase) -> Result<T> {
        self.map_err(|e| e.in_epoch(epoch, phase))
    }
}
