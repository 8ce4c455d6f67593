//! Explicit randomness handles for augmentation and shuffling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws threaded through every random decision in the
/// pipeline.
pub trait RandomSource {
    /// Uniform value in `[0, 1)`.
    fn next_uniform(&mut self) -> f32;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty.
    fn uniform_range(&mut self, min: f32, max: f32) -> f32 {
        let u = self.next_uniform();
        min + (max - min) * u
    }

    /// Uniform index in `0..n`. `n` must be > 0.
    fn next_index(&mut self, n: usize) -> usize {
        let idx = (self.next_uniform() * n as f32) as usize;
        idx.min(n - 1)
    }
}

impl RandomSource for StdRng {
    fn next_uniform(&mut self) -> f32 {
        self.random::<f32>()
    }

    fn next_index(&mut self, n: usize) -> usize {
        self.random_range(0..n)
    }
}

/// Builds the RNG for one pipeline invocation.
///
/// With a seed, invocation `k` always gets the same stream, so repeated runs
/// are reproducible while train and eval streams stay distinct.
pub fn rng_for_invocation(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_os_rng(),
    }
}

/// Replays a fixed list of draws in a loop.
///
/// Useful to pin augmentation decisions in tests and previews.
#[derive(Debug, Clone)]
pub struct ScriptedDraws {
    draws: Vec<f32>,
    position: usize,
}

impl ScriptedDraws {
    /// `draws` must be non-empty and each value in `[0, 1)`.
    pub fn new(draws: Vec<f32>) -> Self {
        assert!(!draws.is_empty(), "ScriptedDraws needs at least one draw");
        Self { draws, position: 0 }
    }

    /// Always returns `value`.
    pub fn constant(value: f32) -> Self {
        Self::new(vec![value])
    }

    /// Number of draws consumed so far.
    pub fn consumed(&self) -> usize {
        self.position
    }
}

impl RandomSource for ScriptedDraws {
    fn next_uniform(&mut self) -> f32 {
        let value = self.draws[self.position % self.draws.len()];
        self.position += 1;
        value
    }
}
