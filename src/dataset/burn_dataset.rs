//! Burn Dataset Integration for CIFAR-10
//!
//! In-memory `Dataset` over decoded records and a `Batcher` that scales
//! pixels to [0, 1] and normalizes each channel.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;

use super::cifar10::{CifarItem, IMAGE_BYTES};
use crate::IMAGE_SIZE;

/// Per-channel mean of the training set
pub const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
/// Per-channel standard deviation of the training set
pub const CIFAR_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// Dataset holding every record of one split in memory
#[derive(Clone, Debug, Default)]
pub struct CifarDataset {
    items: Vec<CifarItem>,
}

impl CifarDataset {
    pub fn from_items(items: Vec<CifarItem>) -> Self {
        Self { items }
    }

    /// Images per class
    pub fn class_distribution(&self) -> [usize; crate::NUM_CLASSES] {
        let mut counts = [0usize; crate::NUM_CLASSES];
        for item in &self.items {
            counts[item.label] += 1;
        }
        counts
    }
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of CIFAR images
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batcher producing normalized image tensors
#[derive(Clone, Debug)]
pub struct CifarBatcher {
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for CifarBatcher {
    fn default() -> Self {
        Self {
            mean: CIFAR_MEAN,
            std: CIFAR_STD,
        }
    }
}

impl CifarBatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Batcher<B, CifarItem, ImageBatch<B>> for CifarBatcher {
    fn batch(&self, items: Vec<CifarItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().map(|&p| p as f32 / 255.0))
            .collect();
        debug_assert_eq!(images_data.len(), batch_size * IMAGE_BYTES);

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );

        // (x - mean) / std
        let mean = Tensor::<B, 4>::from_floats(TensorData::new(self.mean.to_vec(), [1, 3, 1, 1]), device);
        let std = Tensor::<B, 4>::from_floats(TensorData::new(self.std.to_vec(), [1, 3, 1, 1]), device);
        let images = (images - mean) / std;

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}
