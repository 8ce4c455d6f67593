//! Patch input pipeline.
//!
//! Records flow leaf-first through these modules:
//!
//! - [`dataset`]: glob resolution and lazy multi-file record streams
//! - [`dimensions`]: one-time discovery of the patch shape
//! - [`example`]: record decoding and label weighting
//! - [`transforms`]: shift and rotation augmentation
//! - [`dataloader`]: shuffle buffer and batching
//! - [`pipeline`]: input functions tying the above together
//!
//! ```rust,ignore
//! use glyph_patches::data::{DimensionReader, InputMode, InputPipeline};
//!
//! let dims = Arc::new(DimensionReader::new("train-*.tfrecords"));
//! let pipeline = InputPipeline::new(dims, &config);
//! let input_fn = pipeline.input_fn("train-*.tfrecords", InputMode::Train);
//! for batch in input_fn()?.take(10) {
//!     let batch = batch?;
//!     println!("{:?}", batch.patch.shape());
//! }
//! ```

pub mod dataloader;
pub mod dataset;
pub mod dimensions;
pub mod example;
pub mod label_weights;
pub mod pipeline;
pub mod random;
pub mod transforms;

pub use dataloader::{Batch, BatchPolicy, Batcher};
pub use dataset::{resolve_glob, RecordDataset};
pub use dimensions::{DimensionError, DimensionReader, PatchDimensions};
pub use example::{
    encode_labeled_patch, parse_labeled_example, ExampleParser, LabeledExample, ParseError,
    PatchFeatures, WeightedExample, WEIGHT_COLUMN_NAME,
};
pub use label_weights::{ClassWeightTable, LabelWeights, UniformLabelWeights};
pub use pipeline::{
    DrawFactory, DrawSource, InputFn, InputMode, InputPipeline, PatchBatches, PipelineError,
};
pub use random::{rng_for_invocation, RandomSource, ScriptedDraws};
pub use transforms::{
    Augmentation, AugmentationPipeline, RotationAugmentation, ShiftAugmentation, ShiftDirection,
};
