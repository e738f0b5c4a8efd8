//! Training core
//!
//! This module provides:
//! - Per-pass metric accumulation
//! - The training and evaluation passes
//! - Best-model checkpointing
//! - Learning rate schedules
//! - The epoch loop tying them together

pub mod checkpoint;
pub mod evaluator;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{
    CheckpointMeta, CheckpointPolicy, CheckpointStore, EvalOutcome, FileCheckpointStore,
    TrainingState,
};
pub use evaluator::Evaluator;
pub use metrics::{EpochSummary, MetricAccumulator};
pub use orchestrator::{EpochRecord, OrchestratorConfig, RunSummary, TrainingOrchestrator};
pub use scheduler::{LearningRateScheduler, SchedulerType};
pub use trainer::Trainer;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};
    use burn::prelude::*;

    use crate::dataset::cifar10::IMAGE_BYTES;
    use crate::dataset::{BatchOrder, BatchSource, CifarDataset, CifarItem, CifarLoader, ImageBatch};
    use crate::model::ImageClassifier;
    use crate::utils::error::Result;
    use crate::NUM_CLASSES;

    pub type TestBackend = NdArray;
    pub type TestAutodiffBackend = Autodiff<NdArray>;

    /// Linear classifier over mean channel intensities
    #[derive(Module, Debug)]
    pub struct TinyNet<B: Backend> {
        linear: Linear<B>,
    }

    impl<B: Backend> TinyNet<B> {
        pub fn new(device: &B::Device) -> Self {
            Self {
                linear: LinearConfig::new(3, NUM_CLASSES).init(device),
            }
        }

        pub fn weights(&self) -> Vec<f32> {
            self.linear
                .weight
                .val()
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap()
        }
    }

    impl<B: Backend> ImageClassifier<B> for TinyNet<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let [batch_size, channels, _, _] = images.dims();
            let pooled = images
                .mean_dim(3)
                .mean_dim(2)
                .reshape([batch_size, channels]);
            self.linear.forward(pooled)
        }

        fn num_classes(&self) -> usize {
            NUM_CLASSES
        }
    }

    /// `n` images whose brightness encodes their label
    pub fn dataset(n: usize) -> Arc<CifarDataset> {
        let items = (0..n)
            .map(|i| {
                let label = i % NUM_CLASSES;
                CifarItem::new(vec![(label * 25) as u8; IMAGE_BYTES], label).unwrap()
            })
            .collect();
        Arc::new(CifarDataset::from_items(items))
    }

    /// Sequential loader over [`dataset`]
    pub fn loader<B: Backend>(n: usize, batch_size: usize) -> CifarLoader<B> {
        CifarLoader::new(dataset(n), batch_size, BatchOrder::Sequential, Default::default())
            .unwrap()
    }

    /// Yields one batch with more images than labels
    pub struct MismatchedSource;

    impl<B: Backend> BatchSource<B> for MismatchedSource {
        fn num_batches(&self) -> usize {
            1
        }

        fn batches(&self, _epoch: usize) -> Box<dyn Iterator<Item = Result<ImageBatch<B>>> + '_> {
            let device = Default::default();
            let batch = ImageBatch {
                images: Tensor::zeros([3, 3, 32, 32], &device),
                targets: Tensor::zeros([2], &device),
            };
            Box::new(std::iter::once(Ok(batch)))
        }
    }
}
