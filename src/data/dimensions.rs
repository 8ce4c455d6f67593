//! Discovery of the fixed patch shape.
//!
//! The shape is not configured; it is read from the first usable record of
//! the training set and then reused for every split of the run.

use super::dataset::resolve_glob;
use super::example::{HEIGHT_FEATURE, WIDTH_FEATURE};
use crate::serialization::example::Example;
use crate::serialization::tfrecord::open_records;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DimensionError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("no record with 'height' and 'width' features found in '{0}'")]
    NotFound(String),
}

/// Height and width shared by every patch of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchDimensions {
    pub height: usize,
    pub width: usize,
}

impl PatchDimensions {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels in one patch.
    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(height, width)`, the `ndarray` shape order.
    pub fn as_tuple(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

impl fmt::Display for PatchDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Reads the patch dimensions of one glob once and caches them.
///
/// Concurrent first calls are serialized by the cell, so the glob is scanned
/// at most once per reader.
#[derive(Debug)]
pub struct DimensionReader {
    pattern: String,
    cached: OnceCell<PatchDimensions>,
    scans: AtomicUsize,
}

impl DimensionReader {
    /// Nothing is read until the first [`Self::read_patch_dimensions`].
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            cached: OnceCell::new(),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the cached dimensions, scanning the files on first use.
    pub fn read_patch_dimensions(&self) -> Result<PatchDimensions, DimensionError> {
        self.cached
            .get_or_try_init(|| {
                self.scans.fetch_add(1, Ordering::SeqCst);
                scan_patch_dimensions(&self.pattern)
            })
            .copied()
    }

    /// Dimensions if already discovered.
    pub fn cached(&self) -> Option<PatchDimensions> {
        self.cached.get().copied()
    }

    /// How many times the files were actually scanned.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

/// Scans the files matching `pattern`, in glob order, for the first record
/// carrying both `height` and `width`.
///
/// Unreadable files, corrupt frames and undecodable records are skipped.
pub fn scan_patch_dimensions(pattern: &str) -> Result<PatchDimensions, DimensionError> {
    let files = resolve_glob(pattern).map_err(|source| DimensionError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;
    debug!(pattern, files = files.len(), "scanning for patch dimensions");

    for file in &files {
        if let Some(dims) = dimensions_in_file(file) {
            info!(file = %file.display(), %dims, "discovered patch dimensions");
            return Ok(dims);
        }
    }
    Err(DimensionError::NotFound(pattern.to_string()))
}

fn dimensions_in_file(path: &Path) -> Option<PatchDimensions> {
    let records = match open_records(path) {
        Ok(records) => records,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping unreadable file");
            return None;
        }
    };
    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping rest of corrupt file");
                return None;
            }
        };
        let Ok(example) = Example::from_bytes(&record) else {
            debug!(file = %path.display(), "skipping undecodable record");
            continue;
        };
        let height = example.int64_list(HEIGHT_FEATURE).and_then(|v| v.first());
        let width = example.int64_list(WIDTH_FEATURE).and_then(|v| v.first());
        if let (Some(&height), Some(&width)) = (height, width) {
            if height > 0 && width > 0 {
                return Some(PatchDimensions::new(height as usize, width as usize));
            }
            debug!(file = %path.display(), height, width, "skipping record with non-positive dimensions");
        }
    }
    None
}
