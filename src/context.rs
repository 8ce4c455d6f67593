//! Per-run state shared by the input functions, the serving receiver and the
//! orchestrator.

use crate::config::{ConfigError, PatchesConfig};
use crate::data::dimensions::{DimensionError, DimensionReader, PatchDimensions};
use crate::data::label_weights::LabelWeights;
use crate::data::pipeline::{DrawFactory, InputFn, InputMode, InputPipeline, PipelineError};
use crate::data::transforms::Augmentation;
use crate::serving::{PatchFeatureColumn, ServingInputReceiver};
use std::sync::Arc;

/// One training run.
///
/// The patch dimensions are discovered from the training glob on first use
/// and cached here for the lifetime of the context; two contexts never share
/// a cache. The context is `Send + Sync`, so the input functions it hands out
/// may be called from any thread.
#[derive(Clone)]
pub struct TrainingContext {
    config: Arc<PatchesConfig>,
    dimensions: Arc<DimensionReader>,
    pipeline: InputPipeline,
}

impl TrainingContext {
    /// Validates `config`; a training glob is required.
    pub fn new(config: PatchesConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dimensions = Arc::new(DimensionReader::new(config.train_glob()?));
        let pipeline = InputPipeline::new(Arc::clone(&dimensions), &config);
        Ok(Self {
            config: Arc::new(config),
            dimensions,
            pipeline,
        })
    }

    /// Replaces the label weighting policy built from the config.
    pub fn with_label_weights(mut self, label_weights: Arc<dyn LabelWeights>) -> Self {
        self.pipeline = self.pipeline.with_label_weights(label_weights);
        self
    }

    /// Replaces the shift + rotation chain built from the config.
    pub fn with_augmentation(mut self, augmentation: Arc<dyn Augmentation>) -> Self {
        self.pipeline = self.pipeline.with_augmentation(augmentation);
        self
    }

    /// Drives augmentation of every stream from `factory`; see
    /// [`InputPipeline::with_draws`].
    pub fn with_draws(mut self, factory: DrawFactory) -> Self {
        self.pipeline = self.pipeline.with_draws(factory);
        self
    }

    /// The validated run config.
    pub fn config(&self) -> &PatchesConfig {
        &self.config
    }

    pub fn dimension_reader(&self) -> &DimensionReader {
        &self.dimensions
    }

    /// Scans the training glob on the first call, then returns the cached
    /// value.
    pub fn read_patch_dimensions(&self) -> Result<PatchDimensions, DimensionError> {
        self.dimensions.read_patch_dimensions()
    }

    pub fn pipeline(&self) -> &InputPipeline {
        &self.pipeline
    }

    /// Input function over an arbitrary glob.
    pub fn input_fn(&self, glob: impl Into<String>, mode: InputMode) -> InputFn {
        self.pipeline.input_fn(glob, mode)
    }

    /// Shuffled, repeating input over `train_input_patches`.
    pub fn train_input_fn(&self) -> Result<InputFn, PipelineError> {
        Ok(self.input_fn(self.config.train_glob()?, InputMode::Train))
    }

    /// One ordered pass over `eval_input_patches`.
    pub fn eval_input_fn(&self) -> Result<InputFn, PipelineError> {
        Ok(self.input_fn(self.config.eval_glob()?, InputMode::Eval))
    }

    /// Receiver for the discovered patch shape.
    pub fn serving_input_receiver(&self) -> Result<ServingInputReceiver, DimensionError> {
        Ok(ServingInputReceiver::new(self.read_patch_dimensions()?))
    }

    /// The `patch` feature column with the discovered shape.
    pub fn patch_feature_column(&self) -> Result<PatchFeatureColumn, DimensionError> {
        Ok(PatchFeatureColumn::new(self.read_patch_dimensions()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::example::encode_labeled_patch;
    use crate::serialization::tfrecord::create_records;
    use ndarray::Array2;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn context_is_send_and_sync() {
        assert_send_sync::<TrainingContext>();
        assert_send_sync::<InputFn>();
    }

    #[test]
    fn requires_training_glob() {
        assert!(matches!(
            TrainingContext::new(PatchesConfig::new()),
            Err(ConfigError::Missing("train_input_patches"))
        ));
    }

    #[test]
    fn rejects_negative_rotation() {
        let config = PatchesConfig::new()
            .with_train_input_patches("unused/*")
            .with_augmentation(0.5, -1.0);
        assert!(matches!(
            TrainingContext::new(config),
            Err(ConfigError::Invalid { option: "augmentation_max_rotation_degrees", .. })
        ));
    }

    #[test]
    fn dimensions_are_shared_across_callers() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = create_records(dir.path().join("train.tfrecords")).unwrap();
        writer
            .write_record(&encode_labeled_patch(&Array2::ones((5, 3)), 1, None))
            .unwrap();
        writer.flush().unwrap();

        let glob = format!("{}/*.tfrecords", dir.path().display());
        let context = TrainingContext::new(
            PatchesConfig::new()
                .with_train_input_patches(glob.clone())
                .with_eval_input_patches(glob),
        )
        .unwrap();

        let column = context.patch_feature_column().unwrap();
        assert_eq!(column.shape, [5, 3]);
        assert_eq!(context.serving_input_receiver().unwrap().dims(), PatchDimensions::new(5, 3));
        let batch = (context.eval_input_fn().unwrap())().unwrap().next().unwrap().unwrap();
        assert_eq!(batch.patch_dims(), (5, 3));

        let clone = context.clone();
        clone.read_patch_dimensions().unwrap();
        assert_eq!(context.dimension_reader().scan_count(), 1);
    }
}
