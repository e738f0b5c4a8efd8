//! # CIFAR Hybrid
//!
//! Training of CIFAR-10 image classifiers with the Burn framework.
//!
//! ## Features
//!
//! - **Hybrid network**: residual convolutional stem feeding a transformer encoder
//! - **ResNet-50 / ResNet-152**: CIFAR-style bottleneck residual networks
//! - **Best-model checkpointing** with resumable training state
//! - **Seeded, reproducible** batch order per epoch
//!
//! ## Modules
//!
//! - `dataset`: CIFAR-10 binary reader, Burn dataset and batch sources
//! - `model`: network architectures and the classifier trait
//! - `training`: training and evaluation passes, checkpointing, schedules, epoch loop
//! - `config`: run options and TOML loading
//! - `utils`: logging, sinks and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cifar_hybrid::config::RunConfig;
//! use cifar_hybrid::backend::{device_for, TrainingBackend};
//!
//! let config = RunConfig::default();
//! let network = config.architecture().init::<TrainingBackend>(&device_for(0))?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::RunConfig;
pub use dataset::{CifarBatcher, CifarDataset, CifarItem, CifarLoader, ImageBatch};
pub use model::{Architecture, ImageClassifier, ModelKind, Network, ResNetVariant};
pub use training::{
    CheckpointPolicy, FileCheckpointStore, LearningRateScheduler, RunSummary,
    TrainingOrchestrator, TrainingState,
};
pub use utils::error::{Result, TrainError};

/// CIFAR-10 classes
pub const NUM_CLASSES: usize = 10;

/// Side of the square input images
pub const IMAGE_SIZE: usize = 32;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
