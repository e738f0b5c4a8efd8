//! CIFAR-10 dataset handling
//!
//! - [`cifar10`]: binary batch file reader and optional downloader
//! - [`burn_dataset`]: Burn `Dataset` and normalizing `Batcher`
//! - [`loader`]: per-epoch batch sources used by the training loop

pub mod burn_dataset;
pub mod cifar10;
pub mod loader;

pub use burn_dataset::{CifarBatcher, CifarDataset, ImageBatch};
pub use cifar10::{CifarItem, DatasetSplit, CLASS_NAMES};
pub use loader::{BatchOrder, BatchSource, CifarLoader};
