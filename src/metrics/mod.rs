//! Evaluation and dataset statistics.
//!
//! [`EvalMetrics`] aggregates what an estimator reports per evaluation batch,
//! weighting every example by the batch's weight column the same way training
//! does. [`LabelHistogram`] summarizes the labels and weights of a stream.

pub mod running;

pub use running::{RunningMean, RunningStd};

use crate::data::Batch;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the estimator returns for one evaluation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvaluation {
    /// Weighted mean loss of the batch.
    pub loss: f32,
    /// Predicted class per example, shape `[N]`.
    pub predictions: Array1<i64>,
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub global_step: u64,
    pub steps: u64,
    pub examples: usize,
    /// Batch losses averaged by batch weight.
    pub loss: Option<f64>,
    /// Weighted fraction of correct predictions.
    pub accuracy: Option<f64>,
}

/// Accumulates [`BatchEvaluation`]s into [`EvalMetrics`].
#[derive(Debug, Clone, Default)]
pub struct EvalAccumulator {
    steps: u64,
    examples: usize,
    loss: RunningMean,
    accuracy: RunningMean,
}

impl EvalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predictions beyond the batch length are ignored; missing ones count as
    /// wrong.
    pub fn update(&mut self, batch: &Batch, evaluation: &BatchEvaluation) {
        self.steps += 1;
        self.examples += batch.len();
        self.loss
            .update_weighted(f64::from(evaluation.loss), f64::from(batch.weight.sum()));
        for (i, (&label, &weight)) in batch.label.iter().zip(batch.weight.iter()).enumerate() {
            let correct = evaluation.predictions.get(i) == Some(&label);
            self.accuracy
                .update_weighted(if correct { 1.0 } else { 0.0 }, f64::from(weight));
        }
    }

    /// Batches seen so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Weighted loss and accuracy over everything seen. Both are `None`
    /// when no weight was accumulated.
    pub fn finish(&self, global_step: u64) -> EvalMetrics {
        EvalMetrics {
            global_step,
            steps: self.steps,
            examples: self.examples,
            loss: self.loss.mean(),
            accuracy: self.accuracy.mean(),
        }
    }
}

/// Example count and total weight per label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelHistogram {
    counts: BTreeMap<i64, (usize, f64)>,
}

impl LabelHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts the labels and weights of `batch`.
    pub fn update(&mut self, batch: &Batch) {
        for (&label, &weight) in batch.label.iter().zip(batch.weight.iter()) {
            let entry = self.counts.entry(label).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += f64::from(weight);
        }
    }

    /// Examples seen with `label`.
    pub fn count(&self, label: i64) -> usize {
        self.counts.get(&label).map_or(0, |(count, _)| *count)
    }

    /// Summed weight of examples with `label`.
    pub fn total_weight(&self, label: i64) -> f64 {
        self.counts.get(&label).map_or(0.0, |(_, weight)| *weight)
    }

    /// Examples seen over all labels.
    pub fn total(&self) -> usize {
        self.counts.values().map(|(count, _)| count).sum()
    }

    /// `(label, count, total weight)` in label order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, usize, f64)> + '_ {
        self.counts
            .iter()
            .map(|(&label, &(count, weight))| (label, count, weight))
    }
}
