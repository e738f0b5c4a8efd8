//! Best-model checkpointing.
//!
//! This module provides:
//! - [`TrainingState`], the best accuracy and epoch carried across epochs
//! - [`CheckpointStore`], storage of one record (weights + metadata) per model label
//! - [`CheckpointPolicy`], which persists a model only when it beats the best accuracy

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{Result, TrainError};

/// Weights are kept at full precision so a resumed run continues from the exact parameters
type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// State carried from one epoch to the next
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epoch about to run (or that just ran)
    pub epoch: usize,
    /// Best test accuracy seen so far, in percent
    pub best_accuracy: f64,
}

impl TrainingState {
    /// State to continue from after loading `meta`
    pub fn resumed_from(meta: &CheckpointMeta) -> Self {
        Self {
            epoch: meta.epoch + 1,
            best_accuracy: meta.accuracy,
        }
    }
}

/// Evaluation result of one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalOutcome {
    pub accuracy: f64,
    pub epoch: usize,
    /// Learning rate the epoch trained with
    pub learning_rate: f64,
}

/// Metadata stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub label: String,
    pub architecture: String,
    pub accuracy: f64,
    pub epoch: usize,
    pub learning_rate: f64,
    pub num_params: usize,
    pub timestamp: String,
}

/// Storage for the single best record of a run
pub trait CheckpointStore<M> {
    /// Write `model` and `meta`, replacing any previous record
    fn persist(&mut self, model: &M, meta: &CheckpointMeta) -> Result<()>;

    /// Metadata of the stored record, or [`TrainError::NotFound`]
    fn load_meta(&self) -> Result<CheckpointMeta>;

    /// Load stored parameters into `model`
    fn load_model(&self, model: M) -> Result<M>;
}

/// File-backed store: `<dir>/<label>.mpk` weights and `<label>.json` metadata
#[derive(Debug, Clone)]
pub struct FileCheckpointStore<B: Backend> {
    dir: PathBuf,
    label: String,
    device: B::Device,
}

impl<B: Backend> FileCheckpointStore<B> {
    pub fn new(dir: impl Into<PathBuf>, label: impl Into<String>, device: B::Device) -> Self {
        Self {
            dir: dir.into(),
            label: label.into(),
            device,
        }
    }

    /// Weights path without extension (the recorder appends `.mpk`)
    fn weights_stem(&self) -> PathBuf {
        self.dir.join(&self.label)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(format!("{}.mpk", self.label))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.label))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<B: Backend, M: Module<B>> CheckpointStore<M> for FileCheckpointStore<B> {
    fn persist(&mut self, model: &M, meta: &CheckpointMeta) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| TrainError::storage(&self.dir, format!("cannot create directory: {e}")))?;

        let recorder = CheckpointRecorder::new();
        model
            .clone()
            .save_file(self.weights_stem(), &recorder)
            .map_err(|e| TrainError::storage(self.weights_path(), format!("{e:?}")))?;

        // Metadata last, through a rename, so a readable sidecar implies complete weights
        let json = serde_json::to_string_pretty(meta)?;
        let meta_path = self.meta_path();
        let tmp_path = meta_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| TrainError::storage(&tmp_path, e))?;
        fs::rename(&tmp_path, &meta_path).map_err(|e| TrainError::storage(&meta_path, e))?;

        info!("Checkpoint saved to {:?}", self.weights_path());
        Ok(())
    }

    fn load_meta(&self) -> Result<CheckpointMeta> {
        let meta_path = self.meta_path();
        if !meta_path.is_file() || !self.weights_path().is_file() {
            return Err(TrainError::NotFound(meta_path));
        }

        let json = fs::read_to_string(&meta_path).map_err(|e| TrainError::storage(&meta_path, e))?;
        let meta = serde_json::from_str(&json)?;
        Ok(meta)
    }

    fn load_model(&self, model: M) -> Result<M> {
        let weights_path = self.weights_path();
        if !weights_path.is_file() {
            return Err(TrainError::NotFound(weights_path));
        }

        let model = model
            .load_file(self.weights_stem(), &CheckpointRecorder::new(), &self.device)
            .map_err(|e| TrainError::storage(&weights_path, format!("{e:?}")))?;

        info!("Checkpoint loaded from {:?}", weights_path);
        Ok(model)
    }
}

/// Restore model parameters and training state from `store`.
///
/// A missing record is a [`TrainError::Resume`].
pub fn restore<M, S>(store: &S, model: M) -> Result<(M, TrainingState, CheckpointMeta)>
where
    S: CheckpointStore<M> + ?Sized,
{
    let meta = store.load_meta().map_err(|e| match e {
        TrainError::NotFound(path) => TrainError::Resume(format!(
            "no checkpoint found at {}",
            path.display()
        )),
        other => other,
    })?;
    let model = store.load_model(model).map_err(|e| match e {
        TrainError::NotFound(path) => {
            TrainError::Resume(format!("checkpoint weights missing at {}", path.display()))
        }
        other => other,
    })?;

    Ok((model, TrainingState::resumed_from(&meta), meta))
}

/// Keeps the best model by test accuracy
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    label: String,
    architecture: String,
}

impl CheckpointPolicy {
    pub fn new(label: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            architecture: architecture.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Persist `model` if `outcome` strictly beats the best accuracy in `state`.
    ///
    /// Returns the updated state and whether a record was written. Ties keep the
    /// earlier record.
    pub fn consider<B, M, S>(
        &self,
        outcome: EvalOutcome,
        state: TrainingState,
        model: &M,
        store: &mut S,
    ) -> Result<(TrainingState, bool)>
    where
        B: Backend,
        M: Module<B>,
        S: CheckpointStore<M> + ?Sized,
    {
        if outcome.accuracy <= state.best_accuracy {
            return Ok((state, false));
        }

        let meta = CheckpointMeta {
            label: self.label.clone(),
            architecture: self.architecture.clone(),
            accuracy: outcome.accuracy,
            epoch: outcome.epoch,
            learning_rate: outcome.learning_rate,
            num_params: model.num_params(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        store.persist(model, &meta)?;

        Ok((
            TrainingState {
                best_accuracy: outcome.accuracy,
                ..state
            },
            true,
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::memory::{meta, MemoryStore};
    use super::*;
    use crate::training::test_support::{TestBackend, TinyNet};
    use tempfile::TempDir;

    fn outcome(accuracy: f64, epoch: usize) -> EvalOutcome {
        EvalOutcome {
            accuracy,
            epoch,
            learning_rate: 0.01,
        }
    }

    #[test]
    fn test_persists_only_on_strict_improvement() {
        let device = Default::default();
        let model = TinyNet::<TestBackend>::new(&device);
        let policy = CheckpointPolicy::new("hybrid", "TinyNet");
        let mut store = MemoryStore::default();
        let mut state = TrainingState::default();
        let mut persisted = Vec::new();

        for (epoch, accuracy) in [50.0, 48.0, 50.0, 60.0].into_iter().enumerate() {
            let (next, saved) = policy
                .consider::<TestBackend, _, _>(outcome(accuracy, epoch), state, &model, &mut store)
                .unwrap();
            state = next;
            persisted.push(saved);
        }

        assert_eq!(persisted, vec![true, false, false, true]);
        assert_eq!(store.persisted.len(), 2);
        assert_eq!(store.persisted[0].epoch, 0);
        assert_eq!(store.persisted[1].accuracy, 60.0);
        assert_eq!(state.best_accuracy, 60.0);
    }

    #[test]
    fn test_resumed_state() {
        let state = TrainingState::resumed_from(&meta(72.5, 10));
        assert_eq!(state.epoch, 11);
        assert_eq!(state.best_accuracy, 72.5);
    }

    #[test]
    fn test_restore_without_record_is_resume_error() {
        let store = MemoryStore::default();
        let device = Default::default();
        let result = restore(&store, TinyNet::<TestBackend>::new(&device));
        assert!(matches!(result, Err(TrainError::Resume(_))));

        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::<TestBackend>::new(temp_dir.path(), "conv", device);
        let result = restore(&store, TinyNet::<TestBackend>::new(&Default::default()));
        assert!(matches!(result, Err(TrainError::Resume(_))));
    }

    #[test]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut store =
            FileCheckpointStore::<TestBackend>::new(temp_dir.path().join("ckpt"), "hybrid", device);

        let trained = TinyNet::<TestBackend>::new(&Default::default());
        let record = meta(81.25, 4);
        CheckpointStore::<TinyNet<TestBackend>>::persist(&mut store, &trained, &record).unwrap();

        assert!(store.weights_path().is_file());
        assert!(store.meta_path().is_file());

        let fresh = TinyNet::<TestBackend>::new(&Default::default());
        let (restored, state, loaded) = restore(&store, fresh).unwrap();

        assert_eq!(loaded, record);
        assert_eq!(state.epoch, 5);
        assert_eq!(restored.weights(), trained.weights());
    }

    #[test]
    fn test_file_store_overwrites_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let mut store =
            FileCheckpointStore::<TestBackend>::new(temp_dir.path(), "hybrid", Default::default());
        let model = TinyNet::<TestBackend>::new(&Default::default());

        CheckpointStore::persist(&mut store, &model, &meta(40.0, 1)).unwrap();
        CheckpointStore::persist(&mut store, &model, &meta(55.0, 3)).unwrap();

        let loaded = CheckpointStore::<TinyNet<TestBackend>>::load_meta(&store).unwrap();
        assert_eq!(loaded.epoch, 3);

        let files: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
    }
}
