//! Batch collation and epoch-partitioned sampling
//!
//! The collator right-pads variable-length examples into one rectangular batch
//! with `-100` id/label sentinels and `0` mask positions. The sampler assigns
//! each worker a disjoint, deterministic slice of a per-epoch permutation so no
//! communication is needed to agree on the split.

use crate::dataset::{Example, FactDataset};
use crate::model::IGNORE_INDEX;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One rectangular batch ready for the model forward pass. All rows have
/// length `seq_len`; `lens` keeps each example's true (unpadded) length.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    pub input_ids: Vec<Vec<i64>>,
    pub label_ids: Vec<Vec<i64>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub lens: Vec<usize>,
    pub seq_len: usize,
}

impl PaddedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.len()
    }
}

/// Collate a batch of examples into a single padded batch.
///
/// Examples are stable-sorted by descending token length first. The sort has
/// no semantic effect (padding is computed per batch, not per order) but keeps
/// batch layout deterministic.
pub fn collate(examples: &[&Example]) -> Result<PaddedBatch> {
    if examples.is_empty() {
        bail!("cannot collate an empty batch");
    }

    let mut sorted: Vec<&Example> = examples.to_vec();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    // longest example comes first after the sort
    let seq_len = sorted[0].len();

    let mut input_ids = Vec::with_capacity(sorted.len());
    let mut label_ids = Vec::with_capacity(sorted.len());
    let mut attention_mask = Vec::with_capacity(sorted.len());
    let mut lens = Vec::with_capacity(sorted.len());

    for example in sorted {
        let mut ids = vec![IGNORE_INDEX; seq_len];
        ids[..example.len()].copy_from_slice(&example.input_ids);

        let mut labels = vec![IGNORE_INDEX; seq_len];
        labels[..example.len()].copy_from_slice(&example.label_ids);

        let mut mask = vec![0u8; seq_len];
        mask[..example.len()].copy_from_slice(&example.attention_mask);

        input_ids.push(ids);
        label_ids.push(labels);
        attention_mask.push(mask);
        lens.push(example.len());
    }

    Ok(PaddedBatch {
        input_ids,
        label_ids,
        attention_mask,
        lens,
        seq_len,
    })
}

/// Deterministic per-epoch partition of dataset indices across workers.
///
/// Every rank computes the same seeded permutation of `0..len` and takes its
/// own contiguous chunk, so the union over ranks is an exact partition and no
/// rank needs to talk to another. `set_epoch` must be called before iterating
/// each epoch or every epoch silently reuses epoch 0's permutation.
#[derive(Debug, Clone)]
pub struct PartitionedSampler {
    len: usize,
    world_size: usize,
    rank: usize,
    seed: u64,
    epoch: u64,
}

impl PartitionedSampler {
    pub fn new(len: usize, world_size: usize, rank: usize, seed: u64) -> Result<Self> {
        if world_size == 0 {
            bail!("world_size must be at least 1");
        }
        if rank >= world_size {
            bail!("rank {} out of range for world_size {}", rank, world_size);
        }
        Ok(Self {
            len,
            world_size,
            rank,
            seed,
            epoch: 0,
        })
    }

    /// Select the permutation for the given epoch.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Indices assigned to this rank for the current epoch, in shuffled order.
    pub fn local_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
        indices.shuffle(&mut rng);

        // contiguous chunks in rank order; the first len % world_size ranks
        // take one extra element, so chunk sizes never differ by more than 1
        let base = self.len / self.world_size;
        let remainder = self.len % self.world_size;
        let start = self.rank * base + self.rank.min(remainder);
        let count = base + usize::from(self.rank < remainder);

        indices[start..start + count].to_vec()
    }

    /// Number of indices this rank owns for any epoch.
    pub fn local_len(&self) -> usize {
        let base = self.len / self.world_size;
        base + usize::from(self.rank < self.len % self.world_size)
    }

    /// Largest per-rank index count in the world. Rank 0 always owns it, so
    /// the writer rank never runs an idle synchronization step.
    pub fn max_local_len(&self) -> usize {
        let base = self.len / self.world_size;
        base + usize::from(self.len % self.world_size > 0)
    }
}

/// Collated batches for one rank and one epoch, in partition order. The final
/// batch may be smaller than `batch_size`.
pub fn epoch_batches(
    dataset: &FactDataset,
    sampler: &PartitionedSampler,
    batch_size: usize,
) -> Result<Vec<PaddedBatch>> {
    let indices = sampler.local_indices();
    let mut batches = Vec::with_capacity(indices.len().div_ceil(batch_size));
    for chunk in indices.chunks(batch_size) {
        let examples: Vec<&Example> = chunk
            .iter()
            .map(|&i| {
                dataset
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("index {} out of bounds", i))
            })
            .collect::<Result<_>>()?;
        batches.push(collate(&examples)?);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(ids: &[i64]) -> Example {
        Example {
            input_ids: ids.to_vec(),
            label_ids: ids.to_vec(),
            attention_mask: vec![1; ids.len()],
        }
    }

    #[test]
    fn test_collate_pads_to_longest() {
        let a = example(&[0, 1, 2, 3, 4]);
        let b = example(&[5, 6, 7]);
        let batch = collate(&[&b, &a]).unwrap();

        assert_eq!(batch.seq_len, 5);
        assert_eq!(batch.batch_size(), 2);
        // longest first after the descending sort
        assert_eq!(batch.lens, vec![5, 3]);
        assert_eq!(batch.input_ids[1], vec![5, 6, 7, -100, -100]);
        assert_eq!(batch.label_ids[1], vec![5, 6, 7, -100, -100]);
        assert_eq!(batch.attention_mask[1], vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_collate_sort_is_stable() {
        let a = example(&[1, 2]);
        let b = example(&[3, 4]);
        let batch = collate(&[&a, &b]).unwrap();
        // equal lengths keep their original relative order
        assert_eq!(batch.input_ids[0], vec![1, 2]);
        assert_eq!(batch.input_ids[1], vec![3, 4]);
    }

    #[test]
    fn test_collate_empty_batch_rejected() {
        assert!(collate(&[]).is_err());
    }

    #[test]
    fn test_partition_is_exact() {
        let world_size = 3;
        let mut seen = vec![0usize; 10];
        for rank in 0..world_size {
            let sampler = PartitionedSampler::new(10, world_size, rank, 7).unwrap();
            for idx in sampler.local_indices() {
                seen[idx] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn test_partition_sizes_differ_by_at_most_one() {
        for (len, world_size) in [(10, 3), (11, 4), (5, 5), (7, 2)] {
            let sizes: Vec<usize> = (0..world_size)
                .map(|rank| {
                    PartitionedSampler::new(len, world_size, rank, 0)
                        .unwrap()
                        .local_indices()
                        .len()
                })
                .collect();
            let max = sizes.iter().max().unwrap();
            let min = sizes.iter().min().unwrap();
            assert!(max - min <= 1, "len={len} world={world_size}: {sizes:?}");
        }
    }

    #[test]
    fn test_partition_deterministic_and_epoch_dependent() {
        let mut a = PartitionedSampler::new(32, 2, 1, 42).unwrap();
        let mut b = PartitionedSampler::new(32, 2, 1, 42).unwrap();
        a.set_epoch(3);
        b.set_epoch(3);
        assert_eq!(a.local_indices(), b.local_indices());

        b.set_epoch(4);
        assert_ne!(a.local_indices(), b.local_indices());
    }
}
