//! Epoch batch sources
//!
//! A [`BatchSource`] hands out one lazy iterator of batches per epoch.
//! Training sources shuffle with a ChaCha8 generator seeded from
//! `seed + epoch`, so a given epoch always sees the same order, including
//! after a resume. Evaluation sources keep dataset order.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::burn_dataset::{CifarBatcher, CifarDataset, ImageBatch};
use super::cifar10::CifarItem;
use crate::utils::error::{Result, TrainError};

/// Source of the batches of one pass
pub trait BatchSource<B: Backend> {
    /// Number of batches a pass yields
    fn num_batches(&self) -> usize;

    /// Batches of the pass for `epoch`, produced on demand
    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<ImageBatch<B>>> + '_>;
}

/// Order in which a loader visits the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    /// Dataset order, identical every epoch
    Sequential,
    /// Reshuffled every epoch from `seed + epoch`
    Shuffled { seed: u64 },
}

/// Batch source over an in-memory CIFAR dataset
pub struct CifarLoader<B: Backend> {
    dataset: Arc<CifarDataset>,
    batcher: CifarBatcher,
    batch_size: usize,
    order: BatchOrder,
    device: B::Device,
}

impl<B: Backend> CifarLoader<B> {
    pub fn new(
        dataset: Arc<CifarDataset>,
        batch_size: usize,
        order: BatchOrder,
        device: B::Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainError::Config("batch size must be positive".into()));
        }

        Ok(Self {
            dataset,
            batcher: CifarBatcher::new(),
            batch_size,
            order,
            device,
        })
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Dataset indices in the order the pass for `epoch` visits them
    pub fn indices(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if let BatchOrder::Shuffled { seed } = self.order {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        indices
    }

    fn make_batch(&self, chunk: &[usize]) -> Result<ImageBatch<B>> {
        let items = chunk
            .iter()
            .map(|&index| {
                self.dataset
                    .get(index)
                    .ok_or_else(|| TrainError::Dataset(format!("missing item at index {index}")))
            })
            .collect::<Result<Vec<CifarItem>>>()?;

        Ok(Batcher::<B, CifarItem, ImageBatch<B>>::batch(
            &self.batcher,
            items,
            &self.device,
        ))
    }
}

impl<B: Backend> BatchSource<B> for CifarLoader<B> {
    fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<ImageBatch<B>>> + '_> {
        let indices = self.indices(epoch);
        let batch_size = self.batch_size;
        let num_batches = self.num_batches();

        Box::new((0..num_batches).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(indices.len());
            self.make_batch(&indices[start..end])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::cifar10::IMAGE_BYTES;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn dataset(n: usize) -> Arc<CifarDataset> {
        let items = (0..n)
            .map(|i| CifarItem::new(vec![i as u8; IMAGE_BYTES], i % 10).unwrap())
            .collect();
        Arc::new(CifarDataset::from_items(items))
    }

    fn loader(n: usize, batch_size: usize, order: BatchOrder) -> CifarLoader<TestBackend> {
        CifarLoader::new(dataset(n), batch_size, order, Default::default()).unwrap()
    }

    #[test]
    fn test_sequential_order_is_dataset_order() {
        let loader = loader(7, 3, BatchOrder::Sequential);
        assert_eq!(loader.indices(0), (0..7).collect::<Vec<_>>());
        assert_eq!(loader.indices(5), loader.indices(0));
    }

    #[test]
    fn test_shuffled_order_is_reproducible() {
        let a = loader(50, 8, BatchOrder::Shuffled { seed: 42 });
        let b = loader(50, 8, BatchOrder::Shuffled { seed: 42 });

        assert_eq!(a.indices(3), b.indices(3));
        assert_ne!(a.indices(3), a.indices(4));

        let mut sorted = a.indices(3);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_batches_cover_dataset_with_short_tail() {
        let loader = loader(7, 3, BatchOrder::Sequential);
        assert_eq!(loader.num_batches(), 3);

        let sizes: Vec<usize> = loader
            .batches(0)
            .map(|batch| batch.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_batch_labels_follow_indices() {
        let loader = loader(20, 20, BatchOrder::Shuffled { seed: 7 });
        let expected: Vec<i64> = loader.indices(2).iter().map(|&i| (i % 10) as i64).collect();

        let batch = loader.batches(2).next().unwrap().unwrap();
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, expected);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = CifarLoader::<TestBackend>::new(
            dataset(4),
            0,
            BatchOrder::Sequential,
            Default::default(),
        );
        assert!(matches!(result, Err(TrainError::Config(_))));
    }
}
