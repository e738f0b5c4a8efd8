//! CIFAR-10 binary format reader
//!
//! The binary distribution stores each split as files of fixed-size records:
//! one label byte followed by 3072 pixel bytes, planar (1024 red, 1024 green,
//! 1024 blue, row-major 32x32 each).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TrainError};
use crate::{IMAGE_SIZE, NUM_CLASSES};

/// CIFAR-10 class names
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Number of pixel bytes per image
pub const IMAGE_BYTES: usize = 3 * IMAGE_SIZE * IMAGE_SIZE;
/// Label byte plus pixels
pub const RECORD_BYTES: usize = IMAGE_BYTES + 1;

/// Directory created by extracting the official archive
pub const BATCHES_DIR: &str = "cifar-10-batches-bin";

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// Which half of the dataset to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetSplit {
    Train,
    Test,
}

impl DatasetSplit {
    pub fn files(&self) -> &'static [&'static str] {
        match self {
            DatasetSplit::Train => &TRAIN_FILES,
            DatasetSplit::Test => std::slice::from_ref(&TEST_FILE),
        }
    }
}

/// One labelled image, pixels kept as raw planar bytes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CifarItem {
    /// Planar RGB bytes, `IMAGE_BYTES` long
    pub pixels: Vec<u8>,
    /// Class label (0-9)
    pub label: usize,
}

impl CifarItem {
    pub fn new(pixels: Vec<u8>, label: usize) -> Result<Self> {
        if pixels.len() != IMAGE_BYTES {
            return Err(TrainError::Dataset(format!(
                "image has {} bytes, expected {IMAGE_BYTES}",
                pixels.len()
            )));
        }
        if label >= NUM_CLASSES {
            return Err(TrainError::Dataset(format!("label {label} out of range")));
        }
        Ok(Self { pixels, label })
    }

    pub fn class_name(&self) -> &'static str {
        CLASS_NAMES[self.label]
    }
}

/// Decode the records of one batch file
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<CifarItem>> {
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(TrainError::Dataset(format!(
            "batch of {} bytes is not a whole number of {RECORD_BYTES}-byte records",
            bytes.len()
        )));
    }

    bytes
        .chunks_exact(RECORD_BYTES)
        .map(|record| CifarItem::new(record[1..].to_vec(), record[0] as usize))
        .collect()
}

/// Root of the extracted batch files under `data_dir`
pub fn batches_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(BATCHES_DIR)
}

/// Read every file of a split, in file order
pub fn load_split(data_dir: &Path, split: DatasetSplit) -> Result<Vec<CifarItem>> {
    let dir = batches_dir(data_dir);
    let mut items = Vec::new();

    for name in split.files() {
        let path = dir.join(name);
        let bytes = fs::read(&path).map_err(|e| {
            TrainError::Dataset(format!("cannot read '{}': {e}", path.display()))
        })?;
        let records = parse_batch(&bytes)
            .map_err(|e| TrainError::Dataset(format!("'{}': {e}", path.display())))?;
        tracing::debug!("Loaded {} records from {}", records.len(), path.display());
        items.extend(records);
    }

    tracing::info!("Loaded {} {:?} images from {}", items.len(), split, dir.display());
    Ok(items)
}

/// Whether all files of both splits are present
pub fn is_available(data_dir: &Path) -> bool {
    let dir = batches_dir(data_dir);
    [DatasetSplit::Train, DatasetSplit::Test]
        .iter()
        .flat_map(|split| split.files())
        .all(|name| dir.join(name).is_file())
}

/// Fetch and unpack the official binary archive unless it is already present
#[cfg(feature = "download")]
pub fn download(data_dir: &Path) -> Result<()> {
    use std::fs::File;
    use std::io::Write;

    const URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";

    if is_available(data_dir) {
        tracing::debug!("CIFAR-10 already present in {}", data_dir.display());
        return Ok(());
    }

    fs::create_dir_all(data_dir)?;
    let archive_path = data_dir.join("cifar-10-binary.tar.gz");

    if !archive_path.exists() {
        tracing::info!("Downloading CIFAR-10 from {URL}");
        let bytes = reqwest::blocking::get(URL)
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(|e| TrainError::Dataset(format!("download failed: {e}")))?;

        let mut file = File::create(&archive_path)?;
        file.write_all(&bytes)?;
    }

    tracing::info!("Extracting {}", archive_path.display());
    let decoder = flate2::read::GzDecoder::new(File::open(&archive_path)?);
    tar::Archive::new(decoder)
        .unpack(data_dir)
        .map_err(|e| TrainError::Dataset(format!("extraction failed: {e}")))?;

    Ok(())
}

#[cfg(test)]
pub(crate) fn synthetic_record(label: u8, fill: u8) -> Vec<u8> {
    let mut record = vec![fill; RECORD_BYTES];
    record[0] = label;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_batch() {
        let mut bytes = synthetic_record(3, 10);
        bytes.extend(synthetic_record(9, 200));

        let items = parse_batch(&bytes).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 3);
        assert_eq!(items[0].class_name(), "cat");
        assert_eq!(items[1].pixels.len(), IMAGE_BYTES);
        assert!(items[1].pixels.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_truncated_batch_is_rejected() {
        let bytes = vec![0u8; RECORD_BYTES + 5];
        assert!(matches!(parse_batch(&bytes), Err(TrainError::Dataset(_))));
    }

    #[test]
    fn test_label_out_of_range() {
        let bytes = synthetic_record(10, 0);
        assert!(matches!(parse_batch(&bytes), Err(TrainError::Dataset(_))));
    }

    #[test]
    fn test_load_split_reads_test_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = batches_dir(temp_dir.path());
        fs::create_dir_all(&dir).unwrap();

        let mut bytes = Vec::new();
        for label in 0..4u8 {
            bytes.extend(synthetic_record(label, label));
        }
        fs::write(dir.join(TEST_FILE), bytes).unwrap();

        let items = load_split(temp_dir.path(), DatasetSplit::Test).unwrap();
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        assert_eq!(labels, vec![0, 1, 2, 3]);
        assert!(!is_available(temp_dir.path()));
    }

    #[test]
    fn test_missing_split_is_dataset_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_split(temp_dir.path(), DatasetSplit::Train);
        assert!(matches!(result, Err(TrainError::Dataset(_))));
    }
}
