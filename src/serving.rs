//! Input contract of an exported patch classifier.
//!
//! Inference callers either send serialized `Example` records carrying a
//! `patch` feature, or the raw `[N, H, W]` patch tensor. Both are turned into
//! the same features the model was trained on, without augmentation.

use crate::data::dimensions::PatchDimensions;
use crate::data::example::{read_patch, ParseError, PATCH_FEATURE};
use crate::serialization::example::Example;
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Alternative accepting serialized `Example` records.
pub const EXAMPLE_RECEIVER: &str = "example";
/// Alternative (and default) accepting the raw patch tensor.
pub const PATCH_RECEIVER: &str = "patch";

#[derive(Error, Debug)]
pub enum ServingError {
    #[error("unknown receiver '{0}', expected 'example' or 'patch'")]
    UnknownReceiver(String),

    #[error("receiver '{receiver}' does not accept {given} input")]
    InputKind {
        receiver: &'static str,
        given: &'static str,
    },

    #[error("example {index}: {source}")]
    Example {
        index: usize,
        #[source]
        source: ParseError,
    },

    #[error("patch tensor has shape {actual:?}, expected N x {expected}")]
    Shape {
        expected: PatchDimensions,
        actual: Vec<usize>,
    },
}

/// What an inference caller sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServingInput {
    Examples(Vec<Vec<u8>>),
    Patches(Array3<f32>),
}

impl ServingInput {
    fn kind(&self) -> &'static str {
        match self {
            ServingInput::Examples(_) => "serialized example",
            ServingInput::Patches(_) => "patch tensor",
        }
    }
}

/// Features handed to the model at inference time.
#[derive(Debug, Clone, PartialEq)]
pub struct ServingFeatures {
    /// Shape `[N, H, W]`.
    pub patch: Array3<f32>,
}

/// Turns serving input into model features for one patch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingInputReceiver {
    dims: PatchDimensions,
}

impl ServingInputReceiver {
    /// Receiver for patches of shape `dims`.
    pub fn new(dims: PatchDimensions) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> PatchDimensions {
        self.dims
    }

    /// Receiver names usable with [`receive_as`](Self::receive_as).
    pub fn alternatives(&self) -> [&'static str; 2] {
        [EXAMPLE_RECEIVER, PATCH_RECEIVER]
    }

    /// Dispatches on the kind of input.
    pub fn receive(&self, input: ServingInput) -> Result<ServingFeatures, ServingError> {
        match input {
            ServingInput::Examples(records) => self.receive_examples(records.as_slice()),
            ServingInput::Patches(patches) => self.receive_patches(patches),
        }
    }

    /// Routes `input` through the named alternative, which must match its kind.
    pub fn receive_as(&self, receiver: &str, input: ServingInput) -> Result<ServingFeatures, ServingError> {
        let (receiver, accepted) = match receiver {
            EXAMPLE_RECEIVER => (EXAMPLE_RECEIVER, matches!(input, ServingInput::Examples(_))),
            PATCH_RECEIVER => (PATCH_RECEIVER, matches!(input, ServingInput::Patches(_))),
            other => return Err(ServingError::UnknownReceiver(other.to_string())),
        };
        if !accepted {
            return Err(ServingError::InputKind {
                receiver,
                given: input.kind(),
            });
        }
        self.receive(input)
    }

    /// Decodes the `patch` feature of every record. Other features are ignored.
    pub fn receive_examples<R: AsRef<[u8]>>(&self, records: &[R]) -> Result<ServingFeatures, ServingError> {
        let mut patch = Array3::zeros((records.len(), self.dims.height, self.dims.width));
        for (index, record) in records.iter().enumerate() {
            let decoded = Example::from_bytes(record.as_ref())
                .map_err(ParseError::from)
                .and_then(|example| read_patch(&example, PATCH_FEATURE, self.dims))
                .map_err(|source| ServingError::Example { index, source })?;
            patch.index_axis_mut(Axis(0), index).assign(&decoded);
        }
        Ok(ServingFeatures { patch })
    }

    /// Checks the shape of a raw patch tensor and passes it through.
    pub fn receive_patches(&self, patches: Array3<f32>) -> Result<ServingFeatures, ServingError> {
        let (_, height, width) = patches.dim();
        if (height, width) != self.dims.as_tuple() {
            return Err(ServingError::Shape {
                expected: self.dims,
                actual: patches.shape().to_vec(),
            });
        }
        Ok(ServingFeatures { patch: patches })
    }

    /// Describes the receivers, for export next to the model.
    pub fn signature(&self) -> ServingSignature {
        ServingSignature::for_dims(self.dims)
    }
}

/// Dtype and shape of one tensor; `None` marks the batch dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: String,
    pub shape: Vec<Option<usize>>,
}

impl TensorSpec {
    fn batched(dtype: &str, dims: &[usize]) -> Self {
        Self {
            dtype: dtype.to_string(),
            shape: std::iter::once(None).chain(dims.iter().copied().map(Some)).collect(),
        }
    }
}

/// Machine readable description of the serving contract, stored with every
/// export as `serving_signature.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingSignature {
    pub default_receiver: String,
    pub receivers: BTreeMap<String, TensorSpec>,
    pub features: BTreeMap<String, TensorSpec>,
}

impl ServingSignature {
    /// Signature with a `[batch, H, W]` float patch input and a serialized
    /// example alternative.
    pub fn for_dims(dims: PatchDimensions) -> Self {
        let patch = TensorSpec::batched("float32", &[dims.height, dims.width]);
        let receivers = BTreeMap::from([
            (EXAMPLE_RECEIVER.to_string(), TensorSpec::batched("string", &[])),
            (PATCH_RECEIVER.to_string(), patch.clone()),
        ]);
        Self {
            default_receiver: PATCH_RECEIVER.to_string(),
            receivers,
            features: BTreeMap::from([(PATCH_FEATURE.to_string(), patch)]),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Dense numeric feature column for the patch: key `patch`, shape (H, W).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFeatureColumn {
    pub key: String,
    pub shape: [usize; 2],
}

impl PatchFeatureColumn {
    pub fn new(dims: PatchDimensions) -> Self {
        Self {
            key: PATCH_FEATURE.to_string(),
            shape: [dims.height, dims.width],
        }
    }

    /// Values per example once flattened.
    pub fn num_elements(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    /// Flattens `[N, H, W]` patches into the `[N, H*W]` dense input a model
    /// consumes.
    pub fn dense_input(&self, patches: &Array3<f32>) -> Result<Array2<f32>, ServingError> {
        let (n, height, width) = patches.dim();
        if [height, width] != self.shape {
            return Err(ServingError::Shape {
                expected: PatchDimensions::new(self.shape[0], self.shape[1]),
                actual: patches.shape().to_vec(),
            });
        }
        Ok(patches
            .to_shape((n, self.num_elements()))
            .map_err(|_| ServingError::Shape {
                expected: PatchDimensions::new(height, width),
                actual: patches.shape().to_vec(),
            })?
            .to_owned())
    }
}
