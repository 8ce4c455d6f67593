//! Record → weighted training example.

use super::dimensions::PatchDimensions;
use super::label_weights::LabelWeights;
use super::random::RandomSource;
use super::transforms::Augmentation;
use crate::serialization::example::Example;
use ndarray::Array2;
use std::sync::Arc;
use thiserror::Error;

/// Float list of `height * width` pixels, row major.
pub const PATCH_FEATURE: &str = "patch";
pub const LABEL_FEATURE: &str = "label";
/// Optional per-record weight factor.
pub const LABEL_WEIGHT_FEATURE: &str = "label_weight";
pub const HEIGHT_FEATURE: &str = "height";
pub const WIDTH_FEATURE: &str = "width";

/// Name of the weight column handed to the estimator.
pub const WEIGHT_COLUMN_NAME: &str = "weight";

/// A record could not be turned into an example.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("record is not a valid Example: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("feature '{0}' is missing")]
    MissingFeature(&'static str),

    #[error("feature '{feature}' has kind {actual}, expected {expected}")]
    WrongKind {
        feature: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("feature '{feature}' has {actual} values, expected {expected}")]
    WrongLength {
        feature: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A decoded, not yet augmented record.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub patch: Array2<f32>,
    pub label: i64,
    pub label_weight: Option<f32>,
}

/// Features dict of one example: the patch and its weight column.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchFeatures {
    pub patch: Array2<f32>,
    pub weight: f32,
}

/// Unit consumed by the batcher.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedExample {
    pub features: PatchFeatures,
    pub label: i64,
}

/// Reads a fixed-shape float feature as a (height, width) patch.
pub(crate) fn read_patch(
    example: &Example,
    feature: &'static str,
    dims: PatchDimensions,
) -> Result<Array2<f32>, ParseError> {
    let values = float_feature(example, feature)?;
    let expected = dims.len();
    if values.len() != expected {
        return Err(ParseError::WrongLength {
            feature,
            expected,
            actual: values.len(),
        });
    }
    Array2::from_shape_vec((dims.height, dims.width), values.to_vec()).map_err(|_| {
        ParseError::WrongLength {
            feature,
            expected,
            actual: values.len(),
        }
    })
}

fn float_feature<'a>(example: &'a Example, feature: &'static str) -> Result<&'a [f32], ParseError> {
    match example.float_list(feature) {
        Some(values) => Ok(values),
        None => Err(missing_or_wrong_kind(example, feature, "float_list")),
    }
}

fn int64_feature<'a>(example: &'a Example, feature: &'static str) -> Result<&'a [i64], ParseError> {
    match example.int64_list(feature) {
        Some(values) => Ok(values),
        None => Err(missing_or_wrong_kind(example, feature, "int64_list")),
    }
}

fn missing_or_wrong_kind(example: &Example, feature: &'static str, expected: &'static str) -> ParseError {
    match example.feature(feature) {
        Some(found) => ParseError::WrongKind {
            feature,
            expected,
            actual: found.kind_name(),
        },
        None => ParseError::MissingFeature(feature),
    }
}

fn scalar<T: Copy>(values: &[T], feature: &'static str) -> Result<T, ParseError> {
    match values {
        [value] => Ok(*value),
        _ => Err(ParseError::WrongLength {
            feature,
            expected: 1,
            actual: values.len(),
        }),
    }
}

/// Decodes `patch`, `label` and, if requested, `label_weight`.
pub fn parse_labeled_example(
    record: &[u8],
    dims: PatchDimensions,
    with_label_weight: bool,
) -> Result<LabeledExample, ParseError> {
    let example = Example::from_bytes(record)?;
    let patch = read_patch(&example, PATCH_FEATURE, dims)?;
    let label = scalar(int64_feature(&example, LABEL_FEATURE)?, LABEL_FEATURE)?;
    let label_weight = if with_label_weight {
        Some(scalar(
            float_feature(&example, LABEL_WEIGHT_FEATURE)?,
            LABEL_WEIGHT_FEATURE,
        )?)
    } else {
        None
    };
    Ok(LabeledExample {
        patch,
        label,
        label_weight,
    })
}

/// Turns serialized records into augmented, weighted examples.
///
/// Parsing holds no per-record state, so one parser can be shared by any
/// number of streams as long as each brings its own [`RandomSource`].
#[derive(Clone)]
pub struct ExampleParser {
    dims: PatchDimensions,
    use_included_label_weight: bool,
    label_weights: Arc<dyn LabelWeights>,
    augmentation: Arc<dyn Augmentation>,
}

impl ExampleParser {
    pub fn new(
        dims: PatchDimensions,
        use_included_label_weight: bool,
        label_weights: Arc<dyn LabelWeights>,
        augmentation: Arc<dyn Augmentation>,
    ) -> Self {
        Self {
            dims,
            use_included_label_weight,
            label_weights,
            augmentation,
        }
    }

    pub fn dims(&self) -> PatchDimensions {
        self.dims
    }

    /// Parses one record, weights it and augments its patch.
    ///
    /// # Arguments
    ///
    /// * `record` - serialized `tf.train.Example`.
    /// * `rng` - source of the augmentation draws for this stream.
    pub fn parse(
        &self,
        record: &[u8],
        rng: &mut dyn RandomSource,
    ) -> Result<WeightedExample, ParseError> {
        let labeled = parse_labeled_example(record, self.dims, self.use_included_label_weight)?;
        let mut weight = self.label_weights.weight(labeled.label);
        if let Some(label_weight) = labeled.label_weight {
            weight *= label_weight;
        }
        let patch = self.augmentation.apply(labeled.patch, rng);
        Ok(WeightedExample {
            features: PatchFeatures { patch, weight },
            label: labeled.label,
        })
    }
}

/// Builds a labeled patch record in the dataset format.
pub fn encode_labeled_patch(patch: &Array2<f32>, label: i64, label_weight: Option<f32>) -> Vec<u8> {
    use crate::serialization::example::Feature;

    let (height, width) = patch.dim();
    let mut example = Example::default()
        .with_feature(HEIGHT_FEATURE, Feature::int64s(vec![height as i64]))
        .with_feature(WIDTH_FEATURE, Feature::int64s(vec![width as i64]))
        .with_feature(PATCH_FEATURE, Feature::floats(patch.iter().copied().collect::<Vec<_>>()))
        .with_feature(LABEL_FEATURE, Feature::int64s(vec![label]));
    if let Some(weight) = label_weight {
        example = example.with_feature(LABEL_WEIGHT_FEATURE, Feature::floats(vec![weight]));
    }
    example.to_bytes()
}
