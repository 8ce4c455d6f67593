//! Input functions: glob → lazy stream of weighted, batched examples.
//!
//! An [`InputFn`] is a zero-argument callable. Every call resolves its glob
//! again, discovers (or reuses) the patch dimensions and returns a fresh,
//! pull-based [`PatchBatches`] iterator, so the estimator can restart input
//! simply by calling it again.

use super::dataloader::{BatchPolicy, Batcher};
use super::dataset::RecordDataset;
use super::dimensions::{DimensionError, DimensionReader};
use super::example::{ExampleParser, ParseError, WeightedExample};
use super::label_weights::{ClassWeightTable, LabelWeights};
use super::random::{rng_for_invocation, RandomSource};
use super::transforms::{Augmentation, AugmentationPipeline};
use crate::config::{BatchConfig, ConfigError, PatchesConfig};
use crate::serialization::tfrecord::RecordError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("no files match '{0}'")]
    NoFiles(String),

    #[error("patch dimensions unavailable: {0}")]
    Dimensions(#[from] DimensionError),

    #[error("reading records failed: {0}")]
    Record(#[from] RecordError),

    #[error("parsing record failed: {0}")]
    Parse(#[from] ParseError),
}

/// Which split an input function feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputMode {
    /// Repeats forever and shuffles.
    Train,
    /// One ordered pass.
    Eval,
}

impl InputMode {
    fn batch_policy(self, config: &BatchConfig) -> BatchPolicy {
        match self {
            InputMode::Train => BatchPolicy::training(config),
            InputMode::Eval => BatchPolicy::evaluation(config),
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Train => write!(f, "train"),
            InputMode::Eval => write!(f, "eval"),
        }
    }
}

/// Augmentation draws owned by one stream.
pub type DrawSource = Box<dyn RandomSource + Send>;

/// Builds the augmentation draws of invocation `k` of a pipeline.
pub type DrawFactory = Arc<dyn Fn(u64) -> DrawSource + Send + Sync>;

/// Records of one invocation, parsed and augmented on demand.
pub struct ParsedRecords {
    records: Box<dyn Iterator<Item = Result<Vec<u8>, RecordError>> + Send>,
    parser: ExampleParser,
    draws: DrawSource,
}

impl Iterator for ParsedRecords {
    type Item = Result<WeightedExample, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        Some(
            self.parser
                .parse(&record, &mut *self.draws)
                .map_err(PipelineError::from),
        )
    }
}

/// Batches produced by one call of an [`InputFn`].
pub type PatchBatches = Batcher<ParsedRecords>;

/// Zero-argument input function handed to the estimator.
pub type InputFn = Arc<dyn Fn() -> Result<PatchBatches, PipelineError> + Send + Sync>;

/// Everything an input function needs besides its glob.
///
/// Cloning is cheap and clones share the dimension cache and the invocation
/// counter.
#[derive(Clone)]
pub struct InputPipeline {
    dimensions: Arc<DimensionReader>,
    use_included_label_weight: bool,
    label_weights: Arc<dyn LabelWeights>,
    augmentation: Arc<dyn Augmentation>,
    batch: BatchConfig,
    seed: Option<u64>,
    draws: Option<DrawFactory>,
    invocations: Arc<AtomicU64>,
}

impl InputPipeline {
    /// Label weights and augmentation come from `config`; override them with
    /// the `with_*` builders.
    pub fn new(dimensions: Arc<DimensionReader>, config: &PatchesConfig) -> Self {
        Self {
            dimensions,
            use_included_label_weight: config.use_included_label_weight,
            label_weights: Arc::new(ClassWeightTable::from_config(&config.label_weights)),
            augmentation: Arc::new(AugmentationPipeline::from_config(config)),
            batch: config.batch.clone(),
            seed: config.seed,
            draws: None,
            invocations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replaces the per-label weighting built from `config.label_weights`.
    pub fn with_label_weights(mut self, label_weights: Arc<dyn LabelWeights>) -> Self {
        self.label_weights = label_weights;
        self
    }

    /// Replaces the shift + rotation chain. An empty
    /// [`AugmentationPipeline`] turns augmentation off without taking draws.
    pub fn with_augmentation(mut self, augmentation: Arc<dyn Augmentation>) -> Self {
        self.augmentation = augmentation;
        self
    }

    /// Overrides batch size, shuffle buffer and remainder handling.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Takes augmentation draws from `factory` instead of the seeded RNG.
    ///
    /// The factory receives the invocation index. Shuffling still uses the
    /// seeded RNG.
    ///
    /// # Example
    /// ```ignore
    /// // Every draw is 0.2: with shift probability 1 each patch moves left.
    /// let pipeline = pipeline.with_draws(Arc::new(|_: u64| -> DrawSource {
    ///     Box::new(ScriptedDraws::constant(0.2))
    /// }));
    /// ```
    pub fn with_draws(mut self, factory: DrawFactory) -> Self {
        self.draws = Some(factory);
        self
    }

    /// Dimension cache shared with every clone of this pipeline.
    pub fn dimensions(&self) -> &DimensionReader {
        &self.dimensions
    }

    /// How many streams have been opened so far.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Wraps [`open`](Self::open) for `glob` and `mode` in a callable.
    pub fn input_fn(&self, glob: impl Into<String>, mode: InputMode) -> InputFn {
        let pipeline = self.clone();
        let glob = glob.into();
        Arc::new(move || pipeline.open(&glob, mode))
    }

    /// Opens one fresh stream of batches.
    ///
    /// The glob must match at least one file. Record and parse failures
    /// surface later, as the first `Err` item of the stream.
    pub fn open(&self, glob: &str, mode: InputMode) -> Result<PatchBatches, PipelineError> {
        let dims = self.dimensions.read_patch_dimensions()?;
        let dataset = RecordDataset::from_glob(glob).map_err(|source| PipelineError::Pattern {
            pattern: glob.to_string(),
            source,
        })?;
        if dataset.is_empty() {
            return Err(PipelineError::NoFiles(glob.to_string()));
        }

        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst);
        let policy = mode.batch_policy(&self.batch);
        info!(
            %mode,
            glob,
            files = dataset.files().len(),
            %dims,
            invocation,
            "opening input stream"
        );
        debug!(?policy, "batch policy");

        let records: Box<dyn Iterator<Item = Result<Vec<u8>, RecordError>> + Send> =
            if policy.repeat {
                Box::new(dataset.repeated_records())
            } else {
                Box::new(dataset.records())
            };
        let parsed = ParsedRecords {
            records,
            parser: ExampleParser::new(
                dims,
                self.use_included_label_weight,
                Arc::clone(&self.label_weights),
                Arc::clone(&self.augmentation),
            ),
            draws: match &self.draws {
                Some(factory) => factory(invocation),
                None => Box::new(rng_for_invocation(self.seed, 2 * invocation)),
            },
        };
        Ok(Batcher::new(
            parsed,
            &policy,
            rng_for_invocation(self.seed, 2 * invocation + 1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::example::encode_labeled_patch;
    use crate::data::random::ScriptedDraws;
    use crate::serialization::tfrecord::create_records;
    use ndarray::Array2;
    use std::path::Path;

    fn write_dataset(dir: &Path, name: &str, count: usize) {
        let mut writer = create_records(dir.join(name)).unwrap();
        for i in 0..count {
            let patch = Array2::from_elem((4, 4), i as f32 / 10.0);
            writer
                .write_record(&encode_labeled_patch(&patch, (i % 2) as i64, None))
                .unwrap();
        }
        writer.flush().unwrap();
    }

    fn pipeline(dir: &Path, batch_size: usize) -> InputPipeline {
        let glob = format!("{}/*.tfrecords", dir.display());
        let config = PatchesConfig::new()
            .with_train_input_patches(glob.clone())
            .with_augmentation(0.0, 0.0)
            .with_seed(11);
        InputPipeline::new(Arc::new(DimensionReader::new(glob)), &config).with_batch(BatchConfig {
            batch_size,
            shuffle_buffer_size: 4,
            drop_remainder: false,
        })
    }

    #[test]
    fn eval_stream_is_one_ordered_pass() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 5);
        let pipeline = pipeline(dir.path(), 2);
        let input_fn = pipeline.input_fn(format!("{}/*.tfrecords", dir.path().display()), InputMode::Eval);

        let batches: Vec<_> = input_fn().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].label.to_vec(), vec![0, 1]);
        assert_eq!(batches[0].patch.shape(), &[2, 4, 4]);

        // Each call is a fresh stream.
        assert_eq!(input_fn().unwrap().count(), 3);
        assert_eq!(pipeline.invocations(), 2);
        assert_eq!(pipeline.dimensions().scan_count(), 1);
    }

    #[test]
    fn train_stream_repeats() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 3);
        let pipeline = pipeline(dir.path(), 2);
        let batches = pipeline
            .open(&format!("{}/*.tfrecords", dir.path().display()), InputMode::Train)
            .unwrap();
        assert_eq!(batches.take(10).filter(Result::is_ok).count(), 10);
    }

    #[test]
    fn seeded_invocations_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 8);
        let glob = format!("{}/*.tfrecords", dir.path().display());
        let first_patch = |pipeline: &InputPipeline| {
            pipeline
                .open(&glob, InputMode::Train)
                .unwrap()
                .next()
                .unwrap()
                .unwrap()
                .patch
        };
        let a = pipeline(dir.path(), 8);
        let b = pipeline(dir.path(), 8);
        assert_eq!(first_patch(&a), first_patch(&b));
    }

    #[test]
    fn draw_factory_sees_invocation_index() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 2);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let pipeline = pipeline(dir.path(), 2).with_draws(Arc::new(move |k: u64| -> DrawSource {
            log.lock().unwrap().push(k);
            Box::new(ScriptedDraws::constant(0.9))
        }));
        let glob = format!("{}/*.tfrecords", dir.path().display());
        for _ in 0..3 {
            assert_eq!(pipeline.open(&glob, InputMode::Eval).unwrap().count(), 1);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_eval_files_fail_the_call() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 1);
        let pipeline = pipeline(dir.path(), 2);
        let err = pipeline
            .open(&format!("{}/*.missing", dir.path().display()), InputMode::Eval)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::NoFiles(_)));
    }

    #[test]
    fn undiscoverable_dimensions_fail_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), 2);
        let err = pipeline
            .open(&format!("{}/*.tfrecords", dir.path().display()), InputMode::Eval)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Dimensions(DimensionError::NotFound(_))));
    }

    #[test]
    fn parse_failure_ends_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "a.tfrecords", 2);
        let mut writer = create_records(dir.path().join("b.tfrecords")).unwrap();
        writer
            .write_record(&encode_labeled_patch(&Array2::zeros((2, 2)), 0, None))
            .unwrap();
        writer.flush().unwrap();

        let pipeline = pipeline(dir.path(), 10);
        let mut batches = pipeline
            .open(&format!("{}/*.tfrecords", dir.path().display()), InputMode::Eval)
            .unwrap();
        assert!(matches!(batches.next(), Some(Err(PipelineError::Parse(_)))));
        assert!(batches.next().is_none());
    }
}
