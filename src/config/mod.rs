//! Run configuration for the patch input pipeline and the train/eval cycle.
//!
//! Every knob lives in one explicit [`PatchesConfig`] value that is handed to
//! the pipeline builder, the augmentation engine and the orchestrator. The
//! config can be deserialized from JSON (all fields optional, defaults below)
//! and then overridden from the command line.
//!
//! ```rust,ignore
//! let mut config = PatchesConfig::from_json_file("run.json")?;
//! config.train_input_patches = Some("data/train-*.tfrecords".into());
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a [`PatchesConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required option '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{option}': {reason}")]
    Invalid { option: &'static str, reason: String },
}

/// Batching policy knobs handed to the batcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Examples per batch.
    pub batch_size: usize,
    /// Size of the shuffle buffer; 0 disables shuffling.
    pub shuffle_buffer_size: usize,
    /// Drop the trailing partial batch of a finite stream.
    pub drop_remainder: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle_buffer_size: 1000,
            drop_remainder: false,
        }
    }
}

/// Per-class weight table used by [`crate::data::ClassWeightTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelWeightsConfig {
    /// Weight for labels not listed in `classes`.
    pub default_weight: f32,
    /// Explicit weight per class id.
    pub classes: BTreeMap<i64, f32>,
}

impl Default for LabelWeightsConfig {
    fn default() -> Self {
        Self {
            default_weight: 1.0,
            classes: BTreeMap::new(),
        }
    }
}

/// Complete configuration of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchesConfig {
    /// Glob of labeled patch TFRecords for training. Also used to discover
    /// the patch dimensions.
    pub train_input_patches: Option<String>,
    /// Glob of labeled patch TFRecords for evaluation.
    pub eval_input_patches: Option<String>,
    /// Output directory for exported models.
    pub model_dir: Option<PathBuf>,
    /// Multiply the label-derived weight by the record's `label_weight`.
    pub use_included_label_weight: bool,
    /// Probability of shifting the patch one pixel left or right. Values
    /// above 1 are treated as 1.
    pub augmentation_x_shift_probability: f32,
    /// Max rotation magnitude in degrees. 0 disables rotation.
    pub augmentation_max_rotation_degrees: f32,
    /// Evaluate at most once per this many seconds.
    pub eval_throttle_secs: u64,
    /// Max training steps; 0 trains until interrupted.
    pub train_max_steps: u64,
    /// Max batches per evaluation; 0 evaluates the whole eval set.
    pub eval_steps: u64,
    pub batch: BatchConfig,
    /// Seed for augmentation and shuffling. `None` seeds from the OS.
    pub seed: Option<u64>,
    pub label_weights: LabelWeightsConfig,
}

impl Default for PatchesConfig {
    fn default() -> Self {
        Self {
            train_input_patches: None,
            eval_input_patches: None,
            model_dir: None,
            use_included_label_weight: false,
            augmentation_x_shift_probability: 0.5,
            augmentation_max_rotation_degrees: 2.0,
            eval_throttle_secs: 60,
            train_max_steps: 100_000,
            eval_steps: 100,
            batch: BatchConfig::default(),
            seed: None,
            label_weights: LabelWeightsConfig::default(),
        }
    }
}

impl PatchesConfig {
    /// Defaults for every option; set the globs before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from a JSON string. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a config from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Pretty JSON, loadable again with [`Self::from_json_str`].
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Training glob. Patch dimensions are discovered from it too.
    pub fn with_train_input_patches(mut self, glob: impl Into<String>) -> Self {
        self.train_input_patches = Some(glob.into());
        self
    }

    /// Evaluation glob.
    pub fn with_eval_input_patches(mut self, glob: impl Into<String>) -> Self {
        self.eval_input_patches = Some(glob.into());
        self
    }

    /// Root directory for exports.
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets both augmentation knobs. `0.0, 0.0` leaves patches unchanged
    /// but still takes both draws per example.
    pub fn with_augmentation(mut self, shift_probability: f32, max_rotation_degrees: f32) -> Self {
        self.augmentation_x_shift_probability = shift_probability;
        self.augmentation_max_rotation_degrees = max_rotation_degrees;
        self
    }

    /// Checks option ranges. Only pipeline options are checked here; the
    /// train/eval paths are checked by [`Self::validate_for_training`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.augmentation_x_shift_probability.is_finite() {
            return Err(ConfigError::Invalid {
                option: "augmentation_x_shift_probability",
                reason: format!("must be finite, got {}", self.augmentation_x_shift_probability),
            });
        }
        let degrees = self.augmentation_max_rotation_degrees;
        if !degrees.is_finite() || degrees < 0.0 {
            return Err(ConfigError::Invalid {
                option: "augmentation_max_rotation_degrees",
                reason: format!("must be a finite value >= 0, got {degrees}"),
            });
        }
        if self.batch.batch_size == 0 {
            return Err(ConfigError::Invalid {
                option: "batch.batch_size",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.label_weights.default_weight.is_finite() {
            return Err(ConfigError::Invalid {
                option: "label_weights.default_weight",
                reason: format!("must be finite, got {}", self.label_weights.default_weight),
            });
        }
        if let Some((label, weight)) = self
            .label_weights
            .classes
            .iter()
            .find(|(_, w)| !w.is_finite())
        {
            return Err(ConfigError::Invalid {
                option: "label_weights.classes",
                reason: format!("weight for label {label} must be finite, got {weight}"),
            });
        }
        Ok(())
    }

    /// [`Self::validate`] plus the paths the orchestrator needs.
    pub fn validate_for_training(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.train_glob()?;
        self.eval_glob()?;
        self.model_dir()?;
        Ok(())
    }

    /// Training glob, or [`ConfigError::Missing`].
    pub fn train_glob(&self) -> Result<&str, ConfigError> {
        self.train_input_patches
            .as_deref()
            .ok_or(ConfigError::Missing("train_input_patches"))
    }

    /// Evaluation glob, or [`ConfigError::Missing`].
    pub fn eval_glob(&self) -> Result<&str, ConfigError> {
        self.eval_input_patches
            .as_deref()
            .ok_or(ConfigError::Missing("eval_input_patches"))
    }

    pub fn model_dir(&self) -> Result<&Path, ConfigError> {
        self.model_dir
            .as_deref()
            .ok_or(ConfigError::Missing("model_dir"))
    }

    /// Shift probability clamped to `[0, 1]`.
    pub fn shift_probability(&self) -> f32 {
        self.augmentation_x_shift_probability.clamp(0.0, 1.0)
    }

    /// Rotation half-range in radians.
    pub fn max_rotation_radians(&self) -> f32 {
        self.augmentation_max_rotation_degrees.to_radians()
    }

    /// `None` when training is unbounded.
    pub fn max_train_steps(&self) -> Option<u64> {
        (self.train_max_steps > 0).then_some(self.train_max_steps)
    }

    /// `None` when evaluation runs over the whole eval set.
    pub fn max_eval_steps(&self) -> Option<u64> {
        (self.eval_steps > 0).then_some(self.eval_steps)
    }

    /// Minimum time between two evaluations.
    pub fn eval_throttle(&self) -> Duration {
        Duration::from_secs(self.eval_throttle_secs)
    }
}
