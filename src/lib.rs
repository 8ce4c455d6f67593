//! # glyph-patches: input pipeline for a patch-based glyph classifier
//!
//! Reads fixed-size grayscale patches and integer labels from TFRecord files
//! of `tf.train.Example` records, augments them with a random one pixel shift
//! and a small rotation, weights every example by its label, and batches them
//! for an external [`estimator::Estimator`]. The same crate describes the
//! serving contract of the exported model.
//!
//! ## Usage Example
//!
//! ```no_run
//! use glyph_patches::config::PatchesConfig;
//! use glyph_patches::context::TrainingContext;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PatchesConfig::new()
//!     .with_train_input_patches("data/train-*.tfrecords")
//!     .with_eval_input_patches("data/eval-*.tfrecords")
//!     .with_model_dir("model");
//! let context = TrainingContext::new(config)?;
//!
//! // Patch shape is discovered from the first training record.
//! println!("patches are {}", context.read_patch_dimensions()?);
//!
//! let input_fn = context.train_input_fn()?;
//! for batch in input_fn()?.take(3) {
//!     let batch = batch?;
//!     println!("{:?} {:?}", batch.patch.shape(), batch.label);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod data;
pub mod estimator;
pub mod metrics;
pub mod serialization;
pub mod serving;
