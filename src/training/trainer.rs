//! Optimisation pass over the training set

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use super::metrics::MetricAccumulator;
use crate::dataset::BatchSource;
use crate::model::ImageClassifier;
use crate::utils::error::{Phase, Result, TrainError};
use crate::utils::sinks::ProgressSink;

/// Check that logits are `[n, num_classes]` for `n` targets
pub(super) fn check_logits<B: Backend>(
    logits: &Tensor<B, 2>,
    targets: &Tensor<B, 1, Int>,
    num_classes: usize,
) -> Result<()> {
    let [rows, cols] = logits.dims();
    let [n] = targets.dims();
    if rows != n || cols != num_classes {
        return Err(TrainError::BatchShape(format!(
            "logits [{rows}, {cols}] for {n} targets over {num_classes} classes"
        )));
    }
    Ok(())
}

/// Predicted classes and true labels as host vectors
pub(super) fn decode<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Result<(Vec<i64>, Vec<i64>)> {
    let [n] = targets.dims();
    let predictions = logits.argmax(1).reshape([n]);
    Ok((to_host(predictions)?, to_host(targets)?))
}

fn to_host<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| TrainError::BatchShape(format!("cannot read labels: {e:?}")))
}

/// Runs one training epoch: forward, cross-entropy, backward, optimizer step per batch
#[derive(Debug, Clone, Copy, Default)]
pub struct Trainer;

impl Trainer {
    pub fn new() -> Self {
        Self
    }

    /// Train `model` on every batch the source yields for `epoch`, in order.
    ///
    /// Each batch gets its own backward pass and exactly one optimizer step at
    /// `learning_rate`. The first failing batch aborts the pass.
    pub fn run_epoch<B, M, O>(
        &self,
        mut model: M,
        optimizer: &mut O,
        learning_rate: f64,
        source: &dyn BatchSource<B>,
        epoch: usize,
        progress: &mut dyn ProgressSink,
    ) -> Result<(M, MetricAccumulator)>
    where
        B: AutodiffBackend,
        M: ImageClassifier<B> + AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let num_classes = model.num_classes();
        let mut metrics = MetricAccumulator::new();

        progress.begin(Phase::Train, source.num_batches());
        for batch in source.batches(epoch) {
            let batch = batch?;

            let logits = model.forward(batch.images);
            check_logits(&logits, &batch.targets, num_classes)?;

            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();

            // Fresh gradients every step
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            let (predictions, labels) = decode(logits.detach(), batch.targets)?;
            metrics.update(loss_value, &predictions, &labels)?;
            progress.batch(&metrics.progress());
        }
        progress.end();

        tracing::debug!(
            epoch,
            batches = metrics.batches(),
            samples = metrics.total(),
            "training pass finished"
        );

        Ok((model, metrics))
    }
}
