//! Observability sinks
//!
//! Scalar time series (one value per metric name and epoch) and per-batch
//! progress reporting. Both are side channels: a run produces the same model
//! and checkpoints whichever sinks are attached.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use super::error::{Phase, Result, TrainError};

/// Scalar tag names emitted once per epoch by the orchestrator
pub mod tags {
    pub const TRAIN_LOSS: &str = "train_loss";
    pub const TRAIN_ACCURACY: &str = "train_accuracy";
    pub const TEST_LOSS: &str = "test_loss";
    pub const TEST_ACCURACY: &str = "test_accuracy";
    pub const LEARNING_RATE: &str = "learning_rate";
}

/// Receiver of scalar time series keyed by (tag, epoch)
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, epoch: usize) -> Result<()>;

    /// Called once after all scalars of an epoch were added
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends `epoch,tag,value` rows to a CSV file
pub struct CsvScalarWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvScalarWriter {
    /// Open (or create) `scalars.csv` inside `log_dir`
    pub fn create(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .map_err(|e| TrainError::storage(log_dir, format!("cannot create log dir: {e}")))?;

        let path = log_dir.join("scalars.csv");
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::storage(&path, e))?;

        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "epoch,tag,value").map_err(|e| TrainError::storage(&path, e))?;
        }

        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarSink for CsvScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, epoch: usize) -> Result<()> {
        writeln!(self.writer, "{},{},{}", epoch, tag, value)
            .map_err(|e| TrainError::storage(&self.path, e))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| TrainError::storage(&self.path, e))
    }
}

/// Logs every scalar at debug level
#[derive(Debug, Default)]
pub struct TracingScalarSink;

impl ScalarSink for TracingScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, epoch: usize) -> Result<()> {
        tracing::debug!(epoch, tag, value, "scalar");
        Ok(())
    }
}

/// Keeps every scalar in memory, in insertion order
#[derive(Debug, Default, Clone)]
pub struct MemoryScalarSink {
    pub records: Vec<(String, usize, f64)>,
}

impl MemoryScalarSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values of one tag as (epoch, value) pairs
    pub fn series(&self, tag: &str) -> Vec<(usize, f64)> {
        self.records
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, epoch, value)| (*epoch, *value))
            .collect()
    }
}

impl ScalarSink for MemoryScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, epoch: usize) -> Result<()> {
        self.records.push((tag.to_string(), epoch, value));
        Ok(())
    }
}

/// Forwards every scalar to each inner sink in order
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Box<dyn ScalarSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ScalarSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ScalarSink for FanOutSink {
    fn add_scalar(&mut self, tag: &str, value: f64, epoch: usize) -> Result<()> {
        for sink in &mut self.sinks {
            sink.add_scalar(tag, value, epoch)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Running figures of a pass, reported after each batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub mean_loss: f64,
    pub accuracy_percent: f64,
    pub correct: usize,
    pub total: usize,
}

/// Per-batch progress display
pub trait ProgressSink {
    fn begin(&mut self, phase: Phase, num_batches: usize);
    fn batch(&mut self, progress: &BatchProgress);
    fn end(&mut self);
}

/// Discards all progress events
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&mut self, _phase: Phase, _num_batches: usize) {}
    fn batch(&mut self, _progress: &BatchProgress) {}
    fn end(&mut self) {}
}

/// Terminal progress bar, one per pass
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for BarProgress {
    fn begin(&mut self, phase: Phase, num_batches: usize) {
        let bar = ProgressBar::new(num_batches as u64);
        let style = ProgressStyle::default_bar()
            .template("  {prefix:>5} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_prefix(phase.to_string());
        self.bar = Some(bar);
    }

    fn batch(&mut self, progress: &BatchProgress) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "Loss: {:.3} | Acc: {:.3}% ({}/{})",
                progress.mean_loss, progress.accuracy_percent, progress.correct, progress.total
            ));
            bar.set_position(progress.batch_index as u64 + 1);
        }
    }

    fn end(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_sink_series() {
        let mut sink = MemoryScalarSink::new();
        sink.add_scalar(tags::TEST_ACCURACY, 50.0, 0).unwrap();
        sink.add_scalar(tags::TRAIN_LOSS, 2.1, 0).unwrap();
        sink.add_scalar(tags::TEST_ACCURACY, 61.5, 1).unwrap();

        assert_eq!(sink.series(tags::TEST_ACCURACY), vec![(0, 50.0), (1, 61.5)]);
        assert_eq!(sink.series(tags::TRAIN_LOSS).len(), 1);
    }

    #[test]
    fn test_csv_writer_appends_rows() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("hybrid");

        {
            let mut writer = CsvScalarWriter::create(&log_dir).unwrap();
            writer.add_scalar(tags::TRAIN_LOSS, 1.5, 0).unwrap();
            writer.flush().unwrap();
        }
        {
            let mut writer = CsvScalarWriter::create(&log_dir).unwrap();
            writer.add_scalar(tags::TRAIN_LOSS, 1.25, 1).unwrap();
            writer.flush().unwrap();
        }

        let content = fs::read_to_string(log_dir.join("scalars.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["epoch,tag,value", "0,train_loss,1.5", "1,train_loss,1.25"]);
    }

    #[test]
    fn test_fan_out_forwards_to_all() {
        let temp_dir = TempDir::new().unwrap();
        let mut sink = FanOutSink::new()
            .with(TracingScalarSink)
            .with(CsvScalarWriter::create(temp_dir.path()).unwrap());

        sink.add_scalar(tags::LEARNING_RATE, 0.01, 3).unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(temp_dir.path().join("scalars.csv")).unwrap();
        assert!(content.contains("3,learning_rate,0.01"));
    }

    #[test]
    fn test_no_progress_is_inert() {
        let mut progress = NoProgress;
        progress.begin(Phase::Train, 3);
        progress.batch(&BatchProgress {
            batch_index: 0,
            mean_loss: 2.3,
            accuracy_percent: 10.0,
            correct: 1,
            total: 10,
        });
        progress.end();
    }
}
