//! Learning rate scheduling.
//!
//! Every schedule here is a pure function of the epoch count: the scheduler
//! never looks at losses or accuracies. The orchestrator moves the scheduler
//! to the first epoch of a run with [`advance_to`] and calls [`step`] once per
//! epoch, after evaluation.
//!
//! [`advance_to`]: LearningRateScheduler::advance_to
//! [`step`]: LearningRateScheduler::step

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::utils::error::{Result, TrainError};

/// Learning rate scheduler type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum SchedulerType {
    /// Constant learning rate (no scheduling)
    #[default]
    Constant,

    /// Step decay: multiply LR by gamma every step_size epochs
    StepLR { step_size: usize, gamma: f64 },

    /// Exponential decay: multiply LR by gamma every epoch
    ExponentialLR { gamma: f64 },

    /// Cosine annealing from the base LR down to eta_min over t_max epochs
    CosineAnnealingLR { t_max: usize, eta_min: f64 },

    /// Linear warmup followed by cosine decay
    WarmupCosine {
        warmup_epochs: usize,
        total_epochs: usize,
        eta_min: f64,
    },
}

impl SchedulerType {
    /// Reject parameters that would divide by zero or grow the LR
    pub fn validate(&self) -> Result<()> {
        match self {
            SchedulerType::Constant => Ok(()),
            SchedulerType::StepLR { step_size, gamma } => {
                if *step_size == 0 {
                    return Err(TrainError::Config("step_size must be positive".into()));
                }
                check_gamma(*gamma)
            }
            SchedulerType::ExponentialLR { gamma } => check_gamma(*gamma),
            SchedulerType::CosineAnnealingLR { t_max, eta_min } => {
                if *t_max == 0 {
                    return Err(TrainError::Config("t_max must be positive".into()));
                }
                check_eta_min(*eta_min)
            }
            SchedulerType::WarmupCosine {
                warmup_epochs,
                total_epochs,
                eta_min,
            } => {
                if warmup_epochs >= total_epochs {
                    return Err(TrainError::Config(format!(
                        "warmup_epochs ({warmup_epochs}) must be below total_epochs ({total_epochs})"
                    )));
                }
                check_eta_min(*eta_min)
            }
        }
    }
}

fn check_gamma(gamma: f64) -> Result<()> {
    if gamma > 0.0 && gamma <= 1.0 {
        Ok(())
    } else {
        Err(TrainError::Config(format!("gamma must be in (0, 1], got {gamma}")))
    }
}

fn check_eta_min(eta_min: f64) -> Result<()> {
    if eta_min >= 0.0 {
        Ok(())
    } else {
        Err(TrainError::Config(format!("eta_min must be non-negative, got {eta_min}")))
    }
}

fn cosine(base_lr: f64, eta_min: f64, progress: f64) -> f64 {
    let progress = progress.clamp(0.0, 1.0);
    eta_min + (base_lr - eta_min) * (1.0 + (progress * PI).cos()) / 2.0
}

/// Learning rate scheduler
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    scheduler_type: SchedulerType,
    base_lr: f64,
    current_lr: f64,
    current_epoch: usize,
}

impl LearningRateScheduler {
    /// Create a new learning rate scheduler
    pub fn new(scheduler_type: SchedulerType, base_lr: f64) -> Result<Self> {
        if !(base_lr > 0.0 && base_lr.is_finite()) {
            return Err(TrainError::Config(format!(
                "learning rate must be positive, got {base_lr}"
            )));
        }
        scheduler_type.validate()?;

        let mut scheduler = Self {
            scheduler_type,
            base_lr,
            current_lr: base_lr,
            current_epoch: 0,
        };
        scheduler.reset();
        Ok(scheduler)
    }

    /// Get the current learning rate
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Learning rate after `steps` calls to [`step`](Self::step)
    pub fn lr_at(&self, steps: usize) -> f64 {
        match &self.scheduler_type {
            SchedulerType::Constant => self.base_lr,
            SchedulerType::StepLR { step_size, gamma } => {
                self.base_lr * gamma.powi((steps / step_size) as i32)
            }
            SchedulerType::ExponentialLR { gamma } => self.base_lr * gamma.powi(steps as i32),
            SchedulerType::CosineAnnealingLR { t_max, eta_min } => {
                cosine(self.base_lr, *eta_min, steps as f64 / *t_max as f64)
            }
            SchedulerType::WarmupCosine {
                warmup_epochs,
                total_epochs,
                eta_min,
            } => {
                if steps < *warmup_epochs {
                    self.base_lr * (steps + 1) as f64 / *warmup_epochs as f64
                } else {
                    let decay_epochs = total_epochs - warmup_epochs;
                    let progress = (steps - warmup_epochs) as f64 / decay_epochs as f64;
                    cosine(self.base_lr, *eta_min, progress)
                }
            }
        }
    }

    /// Step the scheduler (call at the end of each epoch)
    pub fn step(&mut self) {
        self.current_epoch += 1;
        self.current_lr = self.lr_at(self.current_epoch);
    }

    /// Jump to `epoch`, as if [`step`](Self::step) had been called that many times
    pub fn advance_to(&mut self, epoch: usize) {
        self.current_epoch = epoch;
        self.current_lr = self.lr_at(epoch);
    }

    /// Reset the scheduler
    pub fn reset(&mut self) {
        self.current_epoch = 0;
        self.current_lr = self.lr_at(0);
    }

    /// Number of steps taken so far
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    pub fn scheduler_type(&self) -> &SchedulerType {
        &self.scheduler_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_scheduler() {
        let mut scheduler = LearningRateScheduler::new(SchedulerType::Constant, 0.01).unwrap();
        assert_eq!(scheduler.get_lr(), 0.01);

        scheduler.step();
        scheduler.step();
        assert_eq!(scheduler.get_lr(), 0.01);
    }

    #[test]
    fn test_step_lr() {
        let mut scheduler = LearningRateScheduler::new(
            SchedulerType::StepLR {
                step_size: 2,
                gamma: 0.5,
            },
            0.001,
        )
        .unwrap();

        scheduler.step(); // epoch 1
        assert_eq!(scheduler.get_lr(), 0.001);

        scheduler.step(); // epoch 2
        assert!((scheduler.get_lr() - 0.0005).abs() < 1e-9);

        scheduler.step();
        scheduler.step(); // epoch 4
        assert!((scheduler.get_lr() - 0.00025).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_lr() {
        let mut scheduler =
            LearningRateScheduler::new(SchedulerType::ExponentialLR { gamma: 0.9 }, 0.001).unwrap();

        scheduler.step();
        assert!((scheduler.get_lr() - 0.0009).abs() < 1e-9);

        scheduler.step();
        assert!((scheduler.get_lr() - 0.00081).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_is_non_increasing_and_hits_minimum() {
        let horizon = 200;
        let mut scheduler = LearningRateScheduler::new(
            SchedulerType::CosineAnnealingLR {
                t_max: horizon,
                eta_min: 0.0,
            },
            0.01,
        )
        .unwrap();

        let mut previous = scheduler.get_lr();
        assert_eq!(previous, 0.01);
        for _ in 0..horizon {
            scheduler.step();
            let lr = scheduler.get_lr();
            assert!(lr <= previous, "lr rose from {previous} to {lr}");
            previous = lr;
        }

        assert!(scheduler.get_lr().abs() < 1e-12);

        // Past the horizon the rate stays at its minimum
        scheduler.step();
        assert!(scheduler.get_lr().abs() < 1e-12);
    }

    #[test]
    fn test_cosine_halfway() {
        let scheduler = LearningRateScheduler::new(
            SchedulerType::CosineAnnealingLR {
                t_max: 10,
                eta_min: 0.0001,
            },
            0.001,
        )
        .unwrap();

        let lr_at_5 = scheduler.lr_at(5);
        assert!((lr_at_5 - 0.00055).abs() < 1e-9);
    }

    #[test]
    fn test_warmup_cosine() {
        let mut scheduler = LearningRateScheduler::new(
            SchedulerType::WarmupCosine {
                warmup_epochs: 5,
                total_epochs: 20,
                eta_min: 0.0001,
            },
            0.001,
        )
        .unwrap();

        // First epoch already runs at a fraction of the base rate
        let lr_0 = scheduler.get_lr();
        assert!((lr_0 - 0.0002).abs() < 1e-9);

        scheduler.step();
        assert!(scheduler.get_lr() > lr_0);

        for _ in 0..4 {
            scheduler.step();
        }
        let lr_after_warmup = scheduler.get_lr();
        assert!((lr_after_warmup - 0.001).abs() < 1e-9);

        scheduler.step();
        assert!(scheduler.get_lr() < lr_after_warmup);
    }

    #[test]
    fn test_invalid_parameters_are_config_errors() {
        let zero_horizon = SchedulerType::CosineAnnealingLR {
            t_max: 0,
            eta_min: 0.0,
        };
        assert!(matches!(
            LearningRateScheduler::new(zero_horizon, 0.01),
            Err(TrainError::Config(_))
        ));

        assert!(matches!(
            LearningRateScheduler::new(SchedulerType::Constant, 0.0),
            Err(TrainError::Config(_))
        ));

        let growing = SchedulerType::ExponentialLR { gamma: 1.5 };
        assert!(growing.validate().is_err());
    }

    #[test]
    fn test_advance_to_matches_stepping() {
        let schedule = SchedulerType::CosineAnnealingLR {
            t_max: 20,
            eta_min: 0.0,
        };
        let mut stepped = LearningRateScheduler::new(schedule.clone(), 0.05).unwrap();
        for _ in 0..11 {
            stepped.step();
        }

        let mut jumped = LearningRateScheduler::new(schedule, 0.05).unwrap();
        jumped.advance_to(11);

        assert_eq!(jumped.current_epoch(), 11);
        assert_eq!(jumped.get_lr(), stepped.get_lr());
        assert_eq!(jumped.get_lr(), jumped.lr_at(11));
        assert!(jumped.get_lr() < 0.05);
    }

    #[test]
    fn test_reset() {
        let mut scheduler =
            LearningRateScheduler::new(SchedulerType::ExponentialLR { gamma: 0.9 }, 0.001).unwrap();

        scheduler.step();
        scheduler.step();
        assert_eq!(scheduler.current_epoch(), 2);

        scheduler.reset();
        assert_eq!(scheduler.get_lr(), 0.001);
        assert_eq!(scheduler.current_epoch(), 0);
    }
}
