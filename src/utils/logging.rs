//! Logging Module
//!
//! Structured logging through the `tracing` crate, plus an epoch-level
//! logger used by the training orchestrator.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::error::{Result, TrainError};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Directive accepted by `EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| TrainError::Config(format!("Failed to initialize logger: {e}")))
}

/// Epoch-level progress logger
pub struct TrainingLogger {
    first_epoch: usize,
    end_epoch: usize,
    epoch: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a logger for epochs `first_epoch..end_epoch`
    pub fn new(first_epoch: usize, end_epoch: usize) -> Self {
        Self {
            first_epoch,
            end_epoch,
            epoch: first_epoch,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize, learning_rate: f64) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::info!(
            "Epoch {} ({}/{}) started, lr = {:.6}",
            epoch,
            epoch - self.first_epoch + 1,
            self.end_epoch - self.first_epoch,
            learning_rate
        );
    }

    /// Log end of an epoch with metrics
    pub fn end_epoch(&self, train_loss: f64, test_loss: f64, test_accuracy: f64) {
        let epoch_time = self.epoch_start.elapsed().as_secs_f64();
        let done = self.epoch - self.first_epoch + 1;
        let remaining = self.end_epoch.saturating_sub(self.epoch + 1);
        let avg_epoch_time = self.training_start.elapsed().as_secs_f64() / done as f64;

        tracing::info!(
            "Epoch {} completed in {:.1}s | Train loss: {:.4} | Test loss: {:.4} | Test acc: {:.2}% | ETA: {:.0}s",
            self.epoch,
            epoch_time,
            train_loss,
            test_loss,
            test_accuracy,
            remaining as f64 * avg_epoch_time
        );
    }

    /// Log a new best model
    pub fn log_new_best(&self, previous: f64, accuracy: f64) {
        tracing::info!(
            "Saving checkpoint: accuracy improved {:.2}% -> {:.2}%",
            previous,
            accuracy
        );
    }

    /// Log training completion
    pub fn log_complete(&self, best_accuracy: f64) {
        tracing::info!(
            "Training complete! {} epochs in {:.1}s | Best accuracy: {:.2}%",
            self.end_epoch - self.first_epoch,
            self.training_start.elapsed().as_secs_f64(),
            best_accuracy
        );
    }
}
