//! Inference pass over the held-out set
//!
//! The evaluator only ever sees the inner (non-autodiff) module, so no
//! gradients are tracked and parameters cannot change.

use burn::{nn::loss::CrossEntropyLossConfig, prelude::*, tensor::ElementConversion};

use super::metrics::MetricAccumulator;
use super::trainer::{check_logits, decode};
use crate::dataset::BatchSource;
use crate::model::ImageClassifier;
use crate::utils::error::{Phase, Result};
use crate::utils::sinks::ProgressSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `model` on every batch of `source`
    pub fn run_epoch<B, M>(
        &self,
        model: &M,
        source: &dyn BatchSource<B>,
        epoch: usize,
        progress: &mut dyn ProgressSink,
    ) -> Result<MetricAccumulator>
    where
        B: Backend,
        M: ImageClassifier<B>,
    {
        let num_classes = model.num_classes();
        let mut metrics = MetricAccumulator::new();

        progress.begin(Phase::Eval, source.num_batches());
        for batch in source.batches(epoch) {
            let batch = batch?;

            let logits = model.forward(batch.images);
            check_logits(&logits, &batch.targets, num_classes)?;

            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.into_scalar().elem();

            let (predictions, labels) = decode(logits, batch.targets)?;
            metrics.update(loss_value, &predictions, &labels)?;
            progress.batch(&metrics.progress());
        }
        progress.end();

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::test_support::*;
    use crate::utils::error::TrainError;
    use crate::utils::sinks::NoProgress;

    #[test]
    fn test_repeated_evaluation_is_bit_identical() {
        let device = Default::default();
        let model = TinyNet::<TestBackend>::new(&device);
        let source = loader::<TestBackend>(12, 5);
        let evaluator = Evaluator::new();

        let first = evaluator.run_epoch(&model, &source, 0, &mut NoProgress).unwrap();
        let second = evaluator.run_epoch(&model, &source, 1, &mut NoProgress).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.cumulative_loss().to_bits(),
            second.cumulative_loss().to_bits()
        );
        assert_eq!(first.total(), 12);
    }

    #[test]
    fn test_hybrid_eval_mode_is_deterministic() {
        use crate::model::HybridNetConfig;
        use burn::module::AutodiffModule;

        let device = Default::default();
        // Heavy dropout and batch norm: both must be inert in eval mode
        let trained = HybridNetConfig::new()
            .with_embed_dim(16)
            .with_depth(1)
            .with_heads(2)
            .with_patch_size(4)
            .with_dropout(0.5)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let model = trained.valid();
        let source = loader::<TestBackend>(4, 2);
        let evaluator = Evaluator::new();

        let first = evaluator.run_epoch(&model, &source, 0, &mut NoProgress).unwrap();
        let second = evaluator.run_epoch(&model, &source, 1, &mut NoProgress).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total(), 4);

        let images = source.batches(0).next().unwrap().unwrap().images;
        let logits = |x: Tensor<TestBackend, 4>| {
            ImageClassifier::forward(&model, x)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap()
        };
        assert_eq!(logits(images.clone()), logits(images));
    }

    #[test]
    fn test_evaluation_leaves_weights_untouched() {
        let device = Default::default();
        let model = TinyNet::<TestBackend>::new(&device);
        let before = model.weights();

        Evaluator::new()
            .run_epoch(&model, &loader::<TestBackend>(6, 3), 0, &mut NoProgress)
            .unwrap();

        assert_eq!(before, model.weights());
    }

    #[test]
    fn test_empty_source_fails_snapshot() {
        let device = Default::default();
        let model = TinyNet::<TestBackend>::new(&device);
        let metrics = Evaluator::new()
            .run_epoch(&model, &loader::<TestBackend>(0, 3), 0, &mut NoProgress)
            .unwrap();

        assert!(matches!(metrics.snapshot(), Err(TrainError::EmptyPass { .. })));
    }
}
