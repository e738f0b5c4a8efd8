//! Running metrics of a single pass over a dataset.

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TrainError};
use crate::utils::sinks::BatchProgress;

/// Running sums for one epoch pass.
///
/// Created fresh at the start of a pass and updated once per batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricAccumulator {
    cumulative_loss: f64,
    correct: usize,
    total: usize,
    batches: usize,
}

/// Finalized figures of a pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Mean loss per batch
    pub mean_loss: f64,
    /// Percentage of correct predictions, in [0, 100]
    pub accuracy_percent: f64,
    pub correct: usize,
    pub total: usize,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch: its loss, the predicted classes and the true labels
    pub fn update(&mut self, batch_loss: f64, predictions: &[i64], labels: &[i64]) -> Result<()> {
        if predictions.len() != labels.len() {
            return Err(TrainError::BatchShape(format!(
                "{} predictions for {} labels",
                predictions.len(),
                labels.len()
            )));
        }

        let correct = predictions
            .iter()
            .zip(labels.iter())
            .filter(|(pred, label)| pred == label)
            .count();

        self.cumulative_loss += batch_loss;
        self.correct += correct;
        self.total += labels.len();
        self.batches += 1;

        Ok(())
    }

    /// Mean loss and accuracy over everything seen so far.
    ///
    /// Fails with [`TrainError::EmptyPass`] when no sample was observed.
    pub fn snapshot(&self) -> Result<EpochSummary> {
        if self.total == 0 {
            return Err(TrainError::EmptyPass {
                batches: self.batches,
            });
        }

        Ok(EpochSummary {
            mean_loss: self.cumulative_loss / self.batches as f64,
            accuracy_percent: 100.0 * self.correct as f64 / self.total as f64,
            correct: self.correct,
            total: self.total,
        })
    }

    /// Progress figures after the most recent batch
    pub fn progress(&self) -> BatchProgress {
        let batches = self.batches.max(1) as f64;
        let total = self.total.max(1) as f64;
        BatchProgress {
            batch_index: self.batches.saturating_sub(1),
            mean_loss: self.cumulative_loss / batches,
            accuracy_percent: 100.0 * self.correct as f64 / total,
            correct: self.correct,
            total: self.total,
        }
    }

    pub fn cumulative_loss(&self) -> f64 {
        self.cumulative_loss
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_before_update_fails() {
        let acc = MetricAccumulator::new();
        assert!(matches!(
            acc.snapshot(),
            Err(TrainError::EmptyPass { batches: 0 })
        ));
    }

    #[test]
    fn test_update_accumulates() {
        let mut acc = MetricAccumulator::new();
        acc.update(2.0, &[1, 2, 3, 4], &[1, 2, 0, 0]).unwrap();
        acc.update(1.0, &[5, 5], &[5, 5]).unwrap();

        assert_eq!(acc.correct(), 4);
        assert_eq!(acc.total(), 6);
        assert_eq!(acc.batches(), 2);

        let summary = acc.snapshot().unwrap();
        assert_eq!(summary.mean_loss, 1.5);
        assert!((summary.accuracy_percent - 66.666_666).abs() < 1e-3);
    }

    #[test]
    fn test_length_mismatch_is_batch_shape_error() {
        let mut acc = MetricAccumulator::new();
        let result = acc.update(0.5, &[1, 2], &[1, 2, 3]);
        assert!(matches!(result, Err(TrainError::BatchShape(_))));
        assert_eq!(acc.total(), 0);
    }

    #[test]
    fn test_accuracy_stays_in_range() {
        let mut acc = MetricAccumulator::new();
        let batches: [(&[i64], &[i64]); 3] = [
            (&[0, 0, 0], &[0, 0, 0]),
            (&[1, 2, 3], &[3, 2, 1]),
            (&[9], &[4]),
        ];

        for (preds, labels) in batches {
            acc.update(1.0, preds, labels).unwrap();
            let summary = acc.snapshot().unwrap();
            assert!(summary.correct <= summary.total);
            assert!((0.0..=100.0).contains(&summary.accuracy_percent));
        }
    }

    #[test]
    fn test_empty_batches_still_fail_snapshot() {
        let mut acc = MetricAccumulator::new();
        acc.update(0.0, &[], &[]).unwrap();
        assert!(matches!(
            acc.snapshot(),
            Err(TrainError::EmptyPass { batches: 1 })
        ));
    }
}
