//! Batch snapshots in the SafeTensors format.
//!
//! A snapshot holds the three tensors of a [`Batch`] (`patch` F32 `[N, H, W]`,
//! `weight` F32 `[N]`, `label` I64 `[N]`) so augmented input can be inspected
//! with any SafeTensors reader.

use crate::data::Batch;
use ndarray::{Array1, Array3};
use safetensors::serialize_to_file;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tensor names inside a batch snapshot.
pub const PATCH_TENSOR: &str = "patch";
pub const WEIGHT_TENSOR: &str = "weight";
pub const LABEL_TENSOR: &str = "label";

#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("tensor '{name}' has dtype {actual}, expected {expected}")]
    UnsupportedDtype {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("tensor '{name}' has shape {actual:?}, expected rank {rank}")]
    ShapeMismatch {
        name: String,
        rank: usize,
        actual: Vec<usize>,
    },

    #[error("batch tensors disagree on batch size: {0:?}")]
    BatchSizeMismatch(Vec<usize>),

    #[error("tensor '{0}' not found")]
    TensorNotFound(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Writes `batch` to `path`. `metadata` ends up in the file header.
pub fn save_batch<P: AsRef<Path>>(
    path: P,
    batch: &Batch,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let patch: Vec<u8> = batch.patch.iter().flat_map(|x| x.to_le_bytes()).collect();
    let weight: Vec<u8> = batch.weight.iter().flat_map(|x| x.to_le_bytes()).collect();
    let label: Vec<u8> = batch.label.iter().flat_map(|x| x.to_le_bytes()).collect();

    let views = vec![
        (
            PATCH_TENSOR,
            TensorView::new(Dtype::F32, batch.patch.shape().to_vec(), &patch)?,
        ),
        (
            WEIGHT_TENSOR,
            TensorView::new(Dtype::F32, vec![batch.len()], &weight)?,
        ),
        (
            LABEL_TENSOR,
            TensorView::new(Dtype::I64, vec![batch.len()], &label)?,
        ),
    ];
    serialize_to_file(views, &metadata, path.as_ref())?;
    Ok(())
}

/// Reads a snapshot written by [`save_batch`].
pub fn load_batch<P: AsRef<Path>>(path: P) -> Result<Batch> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let (patch_shape, patch) = f32_tensor(&tensors, PATCH_TENSOR)?;
    if patch_shape.len() != 3 {
        return Err(SafeTensorsError::ShapeMismatch {
            name: PATCH_TENSOR.to_string(),
            rank: 3,
            actual: patch_shape,
        });
    }
    let (n, height, width) = (patch_shape[0], patch_shape[1], patch_shape[2]);
    let patch = Array3::from_shape_vec((n, height, width), patch).map_err(|_| {
        SafeTensorsError::ShapeMismatch {
            name: PATCH_TENSOR.to_string(),
            rank: 3,
            actual: vec![n, height, width],
        }
    })?;

    let (_, weight) = f32_tensor(&tensors, WEIGHT_TENSOR)?;
    let label = i64_tensor(&tensors, LABEL_TENSOR)?;
    if weight.len() != n || label.len() != n {
        return Err(SafeTensorsError::BatchSizeMismatch(vec![
            n,
            weight.len(),
            label.len(),
        ]));
    }

    Ok(Batch {
        patch,
        weight: Array1::from(weight),
        label: Array1::from(label),
    })
}

/// Returns (name, shape, dtype) for every tensor in the file.
pub fn tensor_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>, String)>> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut info: Vec<_> = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec(), format!("{:?}", view.dtype())))
        .collect();
    info.sort();
    Ok(info)
}

fn f32_tensor(tensors: &SafeTensors<'_>, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
    let view = tensors
        .tensor(name)
        .map_err(|_| SafeTensorsError::TensorNotFound(name.to_string()))?;
    if view.dtype() != Dtype::F32 {
        return Err(SafeTensorsError::UnsupportedDtype {
            name: name.to_string(),
            expected: "F32",
            actual: format!("{:?}", view.dtype()),
        });
    }
    let values = view
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((view.shape().to_vec(), values))
}

fn i64_tensor(tensors: &SafeTensors<'_>, name: &str) -> Result<Vec<i64>> {
    let view = tensors
        .tensor(name)
        .map_err(|_| SafeTensorsError::TensorNotFound(name.to_string()))?;
    if view.dtype() != Dtype::I64 {
        return Err(SafeTensorsError::UnsupportedDtype {
            name: name.to_string(),
            expected: "I64",
            actual: format!("{:?}", view.dtype()),
        });
    }
    Ok(view
        .data()
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
