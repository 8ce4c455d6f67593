//! Batching of weighted examples.
//!
//! The batcher pulls examples from any fallible iterator, optionally passes
//! them through a shuffle buffer, and stacks them into fixed-size [`Batch`]es.

use super::example::WeightedExample;
use super::random::RandomSource;
use crate::config::BatchConfig;
use ndarray::{Array1, Array3, Axis};
use rand::rngs::StdRng;

/// A stacked group of examples.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Patches, shape `[N, H, W]`.
    pub patch: Array3<f32>,
    /// Weight column, shape `[N]`.
    pub weight: Array1<f32>,
    /// Labels, shape `[N]`.
    pub label: Array1<i64>,
}

impl Batch {
    /// Stacks examples. All patches must share one shape; an empty slice
    /// yields an empty `[0, 0, 0]` batch.
    pub fn from_examples(examples: &[WeightedExample]) -> Self {
        let (height, width) = examples
            .first()
            .map(|e| e.features.patch.dim())
            .unwrap_or((0, 0));
        let mut patch = Array3::zeros((examples.len(), height, width));
        for (i, example) in examples.iter().enumerate() {
            patch
                .index_axis_mut(Axis(0), i)
                .assign(&example.features.patch);
        }
        Self {
            patch,
            weight: examples.iter().map(|e| e.features.weight).collect(),
            label: examples.iter().map(|e| e.label).collect(),
        }
    }

    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }

    /// `(height, width)` of the patches.
    pub fn patch_dims(&self) -> (usize, usize) {
        let shape = self.patch.shape();
        (shape[1], shape[2])
    }
}

/// How examples are grouped into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    /// 0 or 1 keeps source order.
    pub shuffle_buffer_size: usize,
    /// Restart the source after each pass, forever. The input pipeline
    /// reads this to pick a repeating record source; the batcher itself
    /// stops only when its source does.
    pub repeat: bool,
    pub drop_remainder: bool,
}

impl BatchPolicy {
    /// Ordered, single pass batches.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle_buffer_size: 0,
            repeat: false,
            drop_remainder: false,
        }
    }

    /// Shuffled and repeating, as used for training input.
    pub fn training(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            shuffle_buffer_size: config.shuffle_buffer_size,
            repeat: true,
            drop_remainder: config.drop_remainder,
        }
    }

    /// Ordered single pass, as used for evaluation input.
    pub fn evaluation(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            shuffle_buffer_size: 0,
            repeat: false,
            drop_remainder: false,
        }
    }

    /// Pick-and-replace buffer size; 0 or 1 keeps source order.
    pub fn shuffle_buffer(mut self, size: usize) -> Self {
        self.shuffle_buffer_size = size;
        self
    }

    /// Drop a final batch smaller than `batch_size`.
    pub fn drop_remainder(mut self, drop: bool) -> Self {
        self.drop_remainder = drop;
        self
    }
}

/// Groups a stream of examples into batches.
///
/// The first error from the source is yielded and ends the stream; the
/// partial batch it interrupted is discarded.
pub struct Batcher<I> {
    source: I,
    batch_size: usize,
    shuffle_buffer_size: usize,
    drop_remainder: bool,
    buffer: Vec<WeightedExample>,
    rng: StdRng,
    source_done: bool,
    failed: bool,
}

impl<I, E> Batcher<I>
where
    I: Iterator<Item = Result<WeightedExample, E>>,
{
    /// `policy.repeat` is the source's business; the batcher only batches
    /// and shuffles what it is given.
    pub fn new(source: I, policy: &BatchPolicy, rng: StdRng) -> Self {
        Self {
            source,
            batch_size: policy.batch_size.max(1),
            shuffle_buffer_size: policy.shuffle_buffer_size,
            drop_remainder: policy.drop_remainder,
            buffer: Vec::with_capacity(policy.shuffle_buffer_size.min(1 << 16)),
            rng,
            source_done: false,
            failed: false,
        }
    }

    fn next_example(&mut self) -> Option<Result<WeightedExample, E>> {
        if self.shuffle_buffer_size <= 1 {
            return self.source.next();
        }
        while !self.source_done && self.buffer.len() < self.shuffle_buffer_size {
            match self.source.next() {
                Some(Ok(example)) => self.buffer.push(example),
                Some(Err(e)) => return Some(Err(e)),
                None => self.source_done = true,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let index = self.rng.next_index(self.buffer.len());
        Some(Ok(self.buffer.swap_remove(index)))
    }
}

impl<I, E> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<WeightedExample, E>>,
{
    type Item = Result<Batch, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut examples = Vec::with_capacity(self.batch_size);
        while examples.len() < self.batch_size {
            match self.next_example() {
                Some(Ok(example)) => examples.push(example),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }
        if examples.is_empty() || (self.drop_remainder && examples.len() < self.batch_size) {
            return None;
        }
        Some(Ok(Batch::from_examples(&examples)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::example::PatchFeatures;
    use crate::data::random::rng_for_invocation;
    use ndarray::Array2;

    fn examples(n: usize) -> Vec<Result<WeightedExample, String>> {
        (0..n)
            .map(|i| {
                Ok(WeightedExample {
                    features: PatchFeatures {
                        patch: Array2::from_elem((2, 3), i as f32),
                        weight: 1.0 + i as f32,
                    },
                    label: i as i64,
                })
            })
            .collect()
    }

    fn rng() -> StdRng {
        rng_for_invocation(Some(3), 0)
    }

    #[test]
    fn batches_in_order_with_remainder() {
        let batcher = Batcher::new(examples(10).into_iter(), &BatchPolicy::new(4), rng());
        let batches: Vec<Batch> = batcher.collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(batches[0].patch.shape(), &[4, 2, 3]);
        assert_eq!(batches[0].label.to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(batches[2].weight.to_vec(), vec![9.0, 10.0]);
        assert_eq!(batches[1].patch[[1, 0, 0]], 5.0);
    }

    #[test]
    fn drop_remainder_discards_partial_batch() {
        let policy = BatchPolicy::new(4).drop_remainder(true);
        let batcher = Batcher::new(examples(10).into_iter(), &policy, rng());
        assert_eq!(batcher.count(), 2);
    }

    #[test]
    fn shuffle_keeps_every_example_once() {
        let policy = BatchPolicy::new(3).shuffle_buffer(5);
        let batcher = Batcher::new(examples(10).into_iter(), &policy, rng());
        let mut labels: Vec<i64> = batcher
            .flat_map(|b| b.unwrap().label.to_vec())
            .collect();
        assert_ne!(labels, (0..10).collect::<Vec<_>>());
        labels.sort();
        assert_eq!(labels, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_is_reproducible_for_a_seed() {
        let policy = BatchPolicy::new(10).shuffle_buffer(10);
        let run = || {
            Batcher::new(examples(10).into_iter(), &policy, rng())
                .next()
                .unwrap()
                .unwrap()
                .label
                .to_vec()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn error_ends_the_stream() {
        let mut source = examples(5);
        source[3] = Err("bad record".to_string());
        let mut batcher = Batcher::new(source.into_iter(), &BatchPolicy::new(2), rng());
        assert!(batcher.next().unwrap().is_ok());
        assert_eq!(batcher.next().unwrap().unwrap_err(), "bad record");
        assert!(batcher.next().is_none());
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut batcher = Batcher::new(examples(0).into_iter(), &BatchPolicy::new(2), rng());
        assert!(batcher.next().is_none());
    }
}
