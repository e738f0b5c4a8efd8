//! Run configuration
//!
//! Every option has a default, can be set from a TOML file, and can be
//! overridden on the command line. [`RunConfig::validate`] runs before any
//! data or model is touched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{Architecture, ModelKind, ResNetVariant};
use crate::training::SchedulerType;
use crate::utils::error::{Result, TrainError};
use crate::NUM_CLASSES;

/// Learning rate schedule family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Cosine annealing to zero over the run
    Cosine,
    Constant,
    /// Multiply by `step_gamma` every `step_size` epochs
    Step,
    /// Multiply by `exp_gamma` every epoch
    Exponential,
    /// Linear ramp over `warmup_epochs`, then cosine annealing to zero
    #[serde(rename = "warmup-cosine")]
    WarmupCosine,
}

/// Options of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub learning_rate: f64,
    pub resume: bool,
    pub device_id: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub model_kind: ModelKind,
    pub architecture_variant: ResNetVariant,
    pub attention_depth: usize,
    pub attention_heads: usize,
    pub epochs: usize,
    pub momentum: f64,
    pub weight_decay: f64,
    pub scheduler: SchedulerKind,
    pub step_size: usize,
    pub step_gamma: f64,
    pub exp_gamma: f64,
    pub warmup_epochs: usize,
    pub seed: u64,
    pub data_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
    pub progress: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            resume: false,
            device_id: 0,
            batch_size: 256,
            test_batch_size: 100,
            model_kind: ModelKind::Hybrid,
            architecture_variant: ResNetVariant::ResNet50,
            attention_depth: 4,
            attention_heads: 8,
            epochs: 200,
            momentum: 0.9,
            weight_decay: 5e-4,
            scheduler: SchedulerKind::Cosine,
            step_size: 30,
            step_gamma: 0.1,
            exp_gamma: 0.95,
            warmup_epochs: 5,
            seed: 42,
            data_dir: PathBuf::from("./data"),
            checkpoint_dir: PathBuf::from("checkpoint"),
            log_dir: PathBuf::from("log"),
            progress: true,
            verbose: false,
        }
    }
}

/// Load a TOML file into any deserializable type
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| TrainError::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| TrainError::Config(format!("Failed to parse config {}: {e}", path.display())))
}

impl RunConfig {
    /// Defaults overlaid with the contents of `path`
    pub fn from_file(path: &Path) -> Result<Self> {
        load_toml_config(path)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TrainError::Serialization(e.to_string()))
    }

    /// Label keying checkpoints and logs
    pub fn label(&self) -> &'static str {
        self.model_kind.label()
    }

    /// Scalar log directory of this run
    pub fn run_log_dir(&self) -> PathBuf {
        self.log_dir.join(self.label())
    }

    pub fn architecture(&self) -> Architecture {
        match self.model_kind {
            ModelKind::Hybrid => {
                Architecture::hybrid(self.attention_depth, self.attention_heads, NUM_CLASSES)
            }
            ModelKind::Conv => Architecture::conv(self.architecture_variant, NUM_CLASSES),
        }
    }

    /// Schedule of a run whose first epoch is `first_epoch`.
    ///
    /// Annealing schedules end at the run's last epoch bound,
    /// `first_epoch + epochs`.
    pub fn scheduler_type(&self, first_epoch: usize) -> SchedulerType {
        let horizon = first_epoch + self.epochs;
        match self.scheduler {
            SchedulerKind::Cosine => SchedulerType::CosineAnnealingLR {
                t_max: horizon,
                eta_min: 0.0,
            },
            SchedulerKind::WarmupCosine => SchedulerType::WarmupCosine {
                warmup_epochs: self.warmup_epochs,
                total_epochs: horizon,
                eta_min: 0.0,
            },
            SchedulerKind::Constant => SchedulerType::Constant,
            SchedulerKind::Step => SchedulerType::StepLR {
                step_size: self.step_size,
                gamma: self.step_gamma,
            },
            SchedulerKind::Exponential => SchedulerType::ExponentialLR {
                gamma: self.exp_gamma,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TrainError::Config(msg));

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.epochs == 0 {
            return fail("epochs must be positive".into());
        }
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return fail("batch sizes must be positive".into());
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if self.weight_decay < 0.0 {
            return fail(format!("weight_decay must be non-negative, got {}", self.weight_decay));
        }

        self.scheduler_type(0).validate()?;
        if let Architecture::Hybrid(config) = self.architecture() {
            config.validate()?;
        }

        Ok(())
    }
}
