//! Label → example weight policies.
//!
//! The weight becomes the estimator's weight column and is used to counter
//! class imbalance in the loss.

use crate::config::LabelWeightsConfig;
use std::collections::BTreeMap;

/// Maps a class id to a scalar importance weight.
pub trait LabelWeights: Send + Sync {
    fn weight(&self, label: i64) -> f32;
}

impl<F> LabelWeights for F
where
    F: Fn(i64) -> f32 + Send + Sync,
{
    fn weight(&self, label: i64) -> f32 {
        self(label)
    }
}

/// Every label weighs the same.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformLabelWeights(pub f32);

impl Default for UniformLabelWeights {
    fn default() -> Self {
        Self(1.0)
    }
}

impl LabelWeights for UniformLabelWeights {
    fn weight(&self, _label: i64) -> f32 {
        self.0
    }
}

/// Explicit per-class weights with a fallback for unlisted classes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWeightTable {
    default_weight: f32,
    classes: BTreeMap<i64, f32>,
}

impl ClassWeightTable {
    pub fn new(default_weight: f32) -> Self {
        Self {
            default_weight,
            classes: BTreeMap::new(),
        }
    }

    /// Table from the `label_weights` config section.
    pub fn from_config(config: &LabelWeightsConfig) -> Self {
        Self {
            default_weight: config.default_weight,
            classes: config.classes.clone(),
        }
    }

    /// Sets the weight of one class.
    pub fn with_class(mut self, label: i64, weight: f32) -> Self {
        self.classes.insert(label, weight);
        self
    }
}

impl LabelWeights for ClassWeightTable {
    fn weight(&self, label: i64) -> f32 {
        self.classes
            .get(&label)
            .copied()
            .unwrap_or(self.default_weight)
    }
}
