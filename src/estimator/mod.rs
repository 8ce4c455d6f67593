//! Train / evaluate / export cycle.
//!
//! The model itself lives behind the [`Estimator`] trait. This module only
//! drives it: it feeds training batches until the step budget is spent,
//! evaluates at most once per throttle window, evaluates once more at the end,
//! and exports the model after every evaluation.
//!
//! ```rust,ignore
//! let context = TrainingContext::new(PatchesConfig::from_json_file("run.json")?)?;
//! let report = train_and_evaluate(&mut my_estimator, &context)?;
//! println!("final accuracy: {:?}", report.final_metrics().and_then(|m| m.accuracy));
//! ```

pub mod export;

pub use export::{ExportError, ExportInfo, LatestExporter};

use crate::config::ConfigError;
use crate::context::TrainingContext;
use crate::data::dimensions::DimensionError;
use crate::data::pipeline::{InputFn, PipelineError};
use crate::data::Batch;
use crate::metrics::{BatchEvaluation, EvalAccumulator, EvalMetrics};
use crate::serving::ServingInputReceiver;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the exporter used by [`train_and_evaluate`].
pub const EXPORTER_NAME: &str = "exporter";

/// A trainable classifier over patch batches.
pub trait Estimator {
    type Error: StdError + Send + Sync + 'static;

    /// Number of training steps taken so far, including those of a restored
    /// checkpoint.
    fn global_step(&self) -> u64;

    /// One optimization step. Returns the batch loss.
    fn train_step(&mut self, batch: &Batch) -> Result<f32, Self::Error>;

    /// Scores one batch without updating the model.
    fn evaluate_batch(&mut self, batch: &Batch) -> Result<BatchEvaluation, Self::Error>;

    /// Writes the model into `dir`, which already exists. The serving
    /// signature is written by the caller.
    fn export(&self, dir: &Path, receiver: &ServingInputReceiver) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dimensions(#[from] DimensionError),

    #[error("input pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("estimator failed at step {step}: {source}")]
    Estimator {
        step: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Outcome of [`train_and_evaluate`].
#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub global_step: u64,
    pub evaluations: Vec<EvalMetrics>,
    pub exports: Vec<PathBuf>,
}

impl TrainReport {
    /// Metrics of the last evaluation, taken at the final step.
    pub fn final_metrics(&self) -> Option<&EvalMetrics> {
        self.evaluations.last()
    }
}

/// Trains `estimator` on the context's training glob, evaluating on its eval
/// glob and exporting under `<model_dir>/export/exporter`.
///
/// Training stops at `train_max_steps` (never when it is 0) or when the
/// training stream ends. Evaluation reads at most `eval_steps` batches.
///
/// # Arguments
///
/// * `estimator` - model to train; its `global_step` may start above 0.
/// * `context` - run config plus the shared dimension cache.
pub fn train_and_evaluate<E: Estimator>(
    estimator: &mut E,
    context: &TrainingContext,
) -> Result<TrainReport, TrainError> {
    let config = context.config();
    config.validate_for_training()?;
    let receiver = context.serving_input_receiver()?;
    let exporter = LatestExporter::new(EXPORTER_NAME, config.model_dir()?);
    let train_input = context.train_input_fn()?;
    let eval_input = context.eval_input_fn()?;

    let max_steps = config.max_train_steps();
    let throttle = config.eval_throttle();
    let mut cycle = EvalCycle {
        estimator,
        eval_input: &eval_input,
        max_eval_steps: config.max_eval_steps(),
        exporter: &exporter,
        receiver: &receiver,
        report: TrainReport::default(),
        last_evaluated_step: None,
    };

    info!(
        dims = %receiver.dims(),
        max_steps = ?max_steps,
        throttle_secs = throttle.as_secs(),
        "starting training"
    );
    if max_steps.is_some_and(|max| cycle.estimator.global_step() >= max) {
        info!(global_step = cycle.estimator.global_step(), "step budget already spent");
    } else {
        let mut last_eval = Instant::now();
        for batch in train_input()? {
            let batch = batch?;
            let step = cycle.estimator.global_step();
            let loss = cycle
                .estimator
                .train_step(&batch)
                .map_err(|e| estimator_error(step, e))?;
            let step = cycle.estimator.global_step();
            debug!(step, loss, "train step");

            if max_steps.is_some_and(|max| step >= max) {
                break;
            }
            if throttle_elapsed(last_eval, throttle) {
                cycle.evaluate_and_export()?;
                last_eval = Instant::now();
            }
        }
    }

    if cycle.last_evaluated_step != Some(cycle.estimator.global_step()) {
        cycle.evaluate_and_export()?;
    }
    let global_step = cycle.estimator.global_step();
    let mut report = cycle.report;
    report.global_step = global_step;
    info!(global_step = report.global_step, evaluations = report.evaluations.len(), "training finished");
    Ok(report)
}

/// Evaluates the estimator over at most `max_steps` batches of one stream.
pub fn evaluate<E: Estimator>(
    estimator: &mut E,
    batches: impl Iterator<Item = Result<Batch, PipelineError>>,
    max_steps: Option<u64>,
) -> Result<EvalMetrics, TrainError> {
    let mut accumulator = EvalAccumulator::new();
    for batch in batches {
        if max_steps.is_some_and(|max| accumulator.steps() >= max) {
            break;
        }
        let batch = batch?;
        let evaluation = estimator
            .evaluate_batch(&batch)
            .map_err(|e| estimator_error(estimator.global_step(), e))?;
        accumulator.update(&batch, &evaluation);
    }
    Ok(accumulator.finish(estimator.global_step()))
}

struct EvalCycle<'a, E> {
    estimator: &'a mut E,
    eval_input: &'a InputFn,
    max_eval_steps: Option<u64>,
    exporter: &'a LatestExporter,
    receiver: &'a ServingInputReceiver,
    report: TrainReport,
    last_evaluated_step: Option<u64>,
}

impl<E: Estimator> EvalCycle<'_, E> {
    fn evaluate_and_export(&mut self) -> Result<(), TrainError> {
        let batches = (self.eval_input)()?;
        let metrics = evaluate(self.estimator, batches, self.max_eval_steps)?;
        if metrics.steps == 0 {
            warn!("evaluation input produced no batches");
        }
        info!(
            global_step = metrics.global_step,
            loss = ?metrics.loss,
            accuracy = ?metrics.accuracy,
            examples = metrics.examples,
            "evaluation finished"
        );

        let estimator = &*self.estimator;
        let path = self
            .exporter
            .export(self.receiver, metrics.global_step, |dir| {
                estimator
                    .export(dir, self.receiver)
                    .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)
            })?;

        self.last_evaluated_step = Some(metrics.global_step);
        self.report.exports.push(path);
        self.report.evaluations.push(metrics);
        Ok(())
    }
}

fn throttle_elapsed(since: Instant, throttle: Duration) -> bool {
    since.elapsed() >= throttle
}

fn estimator_error<E: StdError + Send + Sync + 'static>(step: u64, error: E) -> TrainError {
    TrainError::Estimator {
        step,
        source: Box::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatchesConfig;
    use crate::data::example::encode_labeled_patch;
    use crate::serialization::tfrecord::create_records;
    use ndarray::{Array1, Array2};
    use std::fs;

    /// Predicts the label stored in the top-left pixel.
    #[derive(Default)]
    struct PixelEstimator {
        step: u64,
        seen: usize,
        exports: usize,
    }

    #[derive(Debug, Error)]
    #[error("mock failure")]
    struct MockError;

    impl Estimator for PixelEstimator {
        type Error = MockError;

        fn global_step(&self) -> u64 {
            self.step
        }

        fn train_step(&mut self, batch: &Batch) -> Result<f32, MockError> {
            self.step += 1;
            self.seen += batch.len();
            Ok(0.1)
        }

        fn evaluate_batch(&mut self, batch: &Batch) -> Result<BatchEvaluation, MockError> {
            let predictions: Array1<i64> = batch
                .patch
                .outer_iter()
                .map(|patch| patch[[0, 0]].round() as i64)
                .collect();
            Ok(BatchEvaluation {
                loss: 0.2,
                predictions,
            })
        }

        fn export(&self, dir: &Path, _receiver: &ServingInputReceiver) -> Result<(), MockError> {
            fs::write(dir.join("step.txt"), self.step.to_string()).map_err(|_| MockError)
        }
    }

    fn fixture(dir: &Path, max_steps: u64, throttle_secs: u64) -> TrainingContext {
        let mut writer = create_records(dir.join("data.tfrecords")).unwrap();
        for i in 0..6 {
            let label = i % 2;
            let patch = Array2::from_elem((3, 3), label as f32);
            writer
                .write_record(&encode_labeled_patch(&patch, label, None))
                .unwrap();
        }
        writer.flush().unwrap();

        let glob = format!("{}/*.tfrecords", dir.display());
        let mut config = PatchesConfig::new()
            .with_train_input_patches(glob.clone())
            .with_eval_input_patches(glob)
            .with_model_dir(dir.join("model"))
            .with_augmentation(0.0, 0.0)
            .with_seed(5);
        config.train_max_steps = max_steps;
        config.eval_throttle_secs = throttle_secs;
        config.batch.batch_size = 4;
        TrainingContext::new(config).unwrap()
    }

    #[test]
    fn stops_at_max_steps_and_exports_once() {
        let dir = tempfile::tempdir().unwrap();
        let context = fixture(dir.path(), 7, 3600);
        let mut estimator = PixelEstimator::default();

        let report = train_and_evaluate(&mut estimator, &context).unwrap();
        assert_eq!(report.global_step, 7);
        assert_eq!(estimator.seen, 28);
        assert_eq!(report.evaluations.len(), 1);
        assert_eq!(report.exports.len(), 1);

        let metrics = report.final_metrics().unwrap();
        assert_eq!(metrics.global_step, 7);
        assert_eq!(metrics.examples, 6);
        assert_eq!(metrics.accuracy, Some(1.0));
        assert_eq!(fs::read_to_string(report.exports[0].join("step.txt")).unwrap(), "7");
    }

    #[test]
    fn zero_throttle_evaluates_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let context = fixture(dir.path(), 3, 0);
        let mut estimator = PixelEstimator::default();

        let report = train_and_evaluate(&mut estimator, &context).unwrap();
        // Steps 1 and 2 in the loop, step 3 at the end.
        let steps: Vec<u64> = report.evaluations.iter().map(|m| m.global_step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        let exporter = LatestExporter::new(EXPORTER_NAME, &dir.path().join("model"));
        assert_eq!(exporter.exports().unwrap().len(), 3);
    }

    #[test]
    fn exhausted_budget_only_evaluates() {
        let dir = tempfile::tempdir().unwrap();
        let context = fixture(dir.path(), 2, 3600);
        let mut estimator = PixelEstimator {
            step: 5,
            ..Default::default()
        };
        let report = train_and_evaluate(&mut estimator, &context).unwrap();
        assert_eq!(estimator.seen, 0);
        assert_eq!(report.evaluations.len(), 1);
    }

    #[test]
    fn eval_steps_caps_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let context = fixture(dir.path(), 1, 3600);
        let mut estimator = PixelEstimator::default();
        let batches = (context.eval_input_fn().unwrap())().unwrap();
        let metrics = evaluate(&mut estimator, batches, Some(1)).unwrap();
        assert_eq!(metrics.steps, 1);
        assert_eq!(metrics.examples, 4);
    }

    #[test]
    fn missing_model_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let context = fixture(dir.path(), 1, 3600);
        let mut config = context.config().clone();
        config.model_dir = None;
        let context = TrainingContext::new(config).unwrap();
        let err = train_and_evaluate(&mut PixelEstimator::default(), &context).unwrap_err();
        assert!(matches!(err, TrainError::Config(ConfigError::Missing("model_dir"))));
    }
}
