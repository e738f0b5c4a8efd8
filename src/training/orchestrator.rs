//! Epoch loop
//!
//! Every epoch runs, in order: the training pass, the evaluation pass, the
//! checkpoint decision, one scheduler step, and the scalar report. A failure in
//! any phase aborts the run, tagged with the epoch and phase it came from.

use burn::{
    module::{AutodiffModule, Module},
    optim::Optimizer,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use super::checkpoint::{self, CheckpointPolicy, CheckpointStore, EvalOutcome, TrainingState};
use super::evaluator::Evaluator;
use super::metrics::EpochSummary;
use super::scheduler::LearningRateScheduler;
use super::trainer::Trainer;
use crate::dataset::BatchSource;
use crate::model::ImageClassifier;
use crate::utils::error::{Phase, Result, ResultExt};
use crate::utils::format_number;
use crate::utils::logging::TrainingLogger;
use crate::utils::sinks::{tags, ProgressSink, ScalarSink};

/// Run length and resume behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Epochs to run, counted from the starting epoch
    pub total_epochs: usize,
    /// Continue from the stored checkpoint instead of starting fresh
    pub resume: bool,
}

/// Figures of one completed epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train: EpochSummary,
    pub test: EpochSummary,
    /// Whether this epoch produced a new best checkpoint
    pub persisted: bool,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub first_epoch: usize,
    /// Exclusive upper bound of the epoch range
    pub end_epoch: usize,
    pub best_accuracy: f64,
    pub checkpoints_saved: usize,
    pub history: Vec<EpochRecord>,
}

/// Drives training over the epoch range
pub struct TrainingOrchestrator<'a, B: AutodiffBackend> {
    config: OrchestratorConfig,
    policy: CheckpointPolicy,
    trainer: Trainer,
    evaluator: Evaluator,
    train_source: &'a dyn BatchSource<B>,
    eval_source: &'a dyn BatchSource<B::InnerBackend>,
    scalars: &'a mut dyn ScalarSink,
    progress: &'a mut dyn ProgressSink,
}

impl<'a, B: AutodiffBackend> TrainingOrchestrator<'a, B> {
    pub fn new(
        config: OrchestratorConfig,
        policy: CheckpointPolicy,
        train_source: &'a dyn BatchSource<B>,
        eval_source: &'a dyn BatchSource<B::InnerBackend>,
        scalars: &'a mut dyn ScalarSink,
        progress: &'a mut dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            policy,
            trainer: Trainer::new(),
            evaluator: Evaluator::new(),
            train_source,
            eval_source,
            scalars,
            progress,
        }
    }

    /// Report the model size and pick the starting state.
    ///
    /// With `resume` set, parameters and best accuracy come from `store` and
    /// the run continues at the epoch after the stored one.
    pub fn start<M, S>(&self, model: M, store: &S) -> Result<(M, TrainingState)>
    where
        M: ImageClassifier<B> + AutodiffModule<B>,
        S: CheckpointStore<M> + ?Sized,
    {
        tracing::info!(
            "Profile: {} | {} parameters",
            self.policy.architecture(),
            format_number(model.num_params())
        );

        if !self.config.resume {
            return Ok((model, TrainingState::default()));
        }

        tracing::info!("Resuming from checkpoint...");
        let (model, state, meta) = checkpoint::restore(store, model)?;
        tracing::info!(
            "Restored epoch {} ({}) with accuracy {:.2}%, saved {}",
            meta.epoch,
            meta.architecture,
            meta.accuracy,
            meta.timestamp
        );

        Ok((model, state))
    }

    /// Run epochs `state.epoch .. state.epoch + total_epochs`
    pub fn run<M, O, S>(
        &mut self,
        mut model: M,
        optimizer: &mut O,
        scheduler: &mut LearningRateScheduler,
        store: &mut S,
        mut state: TrainingState,
    ) -> Result<(M, RunSummary)>
    where
        M: ImageClassifier<B> + AutodiffModule<B>,
        M::InnerModule: ImageClassifier<B::InnerBackend>,
        O: Optimizer<M, B>,
        S: CheckpointStore<M> + ?Sized,
    {
        let first_epoch = state.epoch;
        let end_epoch = first_epoch + self.config.total_epochs;
        let mut logger = TrainingLogger::new(first_epoch, end_epoch);
        let mut history = Vec::with_capacity(self.config.total_epochs);
        let mut checkpoints_saved = 0;

        // The rate of an epoch depends on its index, also after a resume
        scheduler.advance_to(first_epoch);

        for epoch in first_epoch..end_epoch {
            state.epoch = epoch;
            let learning_rate = scheduler.get_lr();
            logger.start_epoch(epoch, learning_rate);

            let (trained, train_metrics) = self
                .trainer
                .run_epoch(
                    model,
                    optimizer,
                    learning_rate,
                    self.train_source,
                    epoch,
                    &mut *self.progress,
                )
                .in_epoch(epoch, Phase::Train)?;
            model = trained;
            let train = train_metrics.snapshot().in_epoch(epoch, Phase::Train)?;

            let test = self
                .evaluator
                .run_epoch(&model.valid(), self.eval_source, epoch, &mut *self.progress)
                .and_then(|metrics| metrics.snapshot())
                .in_epoch(epoch, Phase::Eval)?;

            let previous_best = state.best_accuracy;
            let outcome = EvalOutcome {
                accuracy: test.accuracy_percent,
                epoch,
                learning_rate,
            };
            let (next, persisted) = self
                .policy
                .consider::<B, M, S>(outcome, state, &model, store)
                .in_epoch(epoch, Phase::Checkpoint)?;
            state = next;
            if persisted {
                logger.log_new_best(previous_best, test.accuracy_percent);
                checkpoints_saved += 1;
            }

            scheduler.step();

            self.report(epoch, learning_rate, &train, &test)
                .in_epoch(epoch, Phase::Report)?;
            logger.end_epoch(train.mean_loss, test.mean_loss, test.accuracy_percent);

            history.push(EpochRecord {
                epoch,
                learning_rate,
                train,
                test,
                persisted,
            });
        }

        logger.log_complete(state.best_accuracy);

        Ok((
            model,
            RunSummary {
                first_epoch,
                end_epoch,
                best_accuracy: state.best_accuracy,
                checkpoints_saved,
                history,
            },
        ))
    }

    fn report(
        &mut self,
        epoch: usize,
        learning_rate: f64,
        train: &EpochSummary,
        test: &EpochSummary,
    ) -> Result<()> {
        self.scalars.add_scalar(tags::TRAIN_LOSS, train.mean_loss, epoch)?;
        self.scalars
            .add_scalar(tags::TRAIN_ACCURACY, train.accuracy_percent, epoch)?;
        self.scalars.add_scalar(tags::TEST_LOSS, test.mean_loss, epoch)?;
        self.scalars
            .add_scalar(tags::TEST_ACCURACY, test.accuracy_percent, epoch)?;
        self.scalars
            .add_scalar(tags::LEARNING_RATE, learning_rate, epoch)?;
        self.scalars.flush()
    }
}
