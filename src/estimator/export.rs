//! Timestamped model exports that keep only the newest few.
//!
//! Layout:
//! ```text
//! <model_dir>/export/<name>/
//! ├── 1718000000/
//! │   ├── serving_signature.json
//! │   ├── export_info.json
//! │   └── ...                      # whatever the estimator writes
//! └── 1718000060/
//! ```
//! An export is assembled in a `temp-<timestamp>` directory and renamed into
//! place, so a numbered directory is always complete.

use crate::serving::{ServingInputReceiver, ServingSignature};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Serving signature written into every export.
pub const SIGNATURE_FILE: &str = "serving_signature.json";
/// [`ExportInfo`] written into every export.
pub const EXPORT_INFO_FILE: &str = "export_info.json";
pub const DEFAULT_EXPORTS_TO_KEEP: usize = 5;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("estimator failed to write the model: {0}")]
    Model(#[source] Box<dyn StdError + Send + Sync>),
}

type Result<T> = std::result::Result<T, ExportError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Metadata written next to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub exporter: String,
    pub global_step: u64,
    pub timestamp: u64,
}

/// Exports the latest model after every evaluation.
#[derive(Debug, Clone)]
pub struct LatestExporter {
    name: String,
    base_dir: PathBuf,
    exports_to_keep: usize,
}

impl LatestExporter {
    /// Exports go to `<model_dir>/export/<name>`.
    pub fn new(name: impl Into<String>, model_dir: &Path) -> Self {
        let name = name.into();
        Self {
            base_dir: model_dir.join("export").join(&name),
            name,
            exports_to_keep: DEFAULT_EXPORTS_TO_KEEP,
        }
    }

    /// Minimum 1.
    pub fn with_exports_to_keep(mut self, keep: usize) -> Self {
        self.exports_to_keep = keep.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<model_dir>/export/<name>`.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Writes one export and garbage-collects old ones.
    ///
    /// # Arguments
    ///
    /// * `receiver` - its signature is stored next to the model.
    /// * `global_step` - recorded in [`EXPORT_INFO_FILE`].
    /// * `write_model` - receives the (temporary) export directory.
    pub fn export<F>(
        &self,
        receiver: &ServingInputReceiver,
        global_step: u64,
        write_model: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>,
    {
        fs::create_dir_all(&self.base_dir).map_err(io_error(&self.base_dir))?;
        let timestamp = self.next_timestamp(unix_now())?;
        let staging = self.base_dir.join(format!("temp-{timestamp}"));
        let target = self.base_dir.join(timestamp.to_string());

        fs::create_dir_all(&staging).map_err(io_error(&staging))?;
        if let Err(e) = self.fill(&staging, receiver, global_step, timestamp, write_model) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        fs::rename(&staging, &target).map_err(io_error(&target))?;
        info!(exporter = %self.name, global_step, path = %target.display(), "exported model");

        self.garbage_collect()?;
        Ok(target)
    }

    fn fill<F>(
        &self,
        dir: &Path,
        receiver: &ServingInputReceiver,
        global_step: u64,
        timestamp: u64,
        write_model: F,
    ) -> Result<()>
    where
        F: FnOnce(&Path) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>,
    {
        write_model(dir).map_err(ExportError::Model)?;
        write_json(&dir.join(SIGNATURE_FILE), &receiver.signature())?;
        let info = ExportInfo {
            exporter: self.name.clone(),
            global_step,
            timestamp,
        };
        write_json(&dir.join(EXPORT_INFO_FILE), &info)
    }

    /// Strictly after every existing export, so a new export always sorts
    /// newest even when several land within one second.
    fn next_timestamp(&self, now: u64) -> Result<u64> {
        let after_latest = self
            .latest()?
            .and_then(|path| export_timestamp(&path))
            .map_or(0, |latest| latest + 1);
        Ok(now.max(after_latest))
    }

    /// Complete exports, oldest first.
    pub fn exports(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut exports: Vec<(u64, PathBuf)> = fs::read_dir(&self.base_dir)
            .map_err(io_error(&self.base_dir))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| Some((export_timestamp(&path)?, path)))
            .collect();
        exports.sort();
        Ok(exports.into_iter().map(|(_, path)| path).collect())
    }

    /// Newest complete export, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.exports()?.pop())
    }

    /// Reads the signature stored with an export.
    pub fn load_signature(export_dir: &Path) -> Result<ServingSignature> {
        let path = export_dir.join(SIGNATURE_FILE);
        let json = fs::read_to_string(&path).map_err(io_error(&path))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn garbage_collect(&self) -> Result<()> {
        let exports = self.exports()?;
        let excess = exports.len().saturating_sub(self.exports_to_keep);
        for old in &exports[..excess] {
            debug!(path = %old.display(), "removing old export");
            fs::remove_dir_all(old).map_err(io_error(old))?;
        }
        Ok(())
    }
}

fn export_timestamp(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.parse().ok()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(io_error(path))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dimensions::PatchDimensions;

    fn receiver() -> ServingInputReceiver {
        ServingInputReceiver::new(PatchDimensions::new(4, 2))
    }

    fn write_weights(dir: &Path) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
        fs::write(dir.join("weights.bin"), b"w")?;
        Ok(())
    }

    #[test]
    fn export_layout() {
        let model_dir = tempfile::tempdir().unwrap();
        let exporter = LatestExporter::new("exporter", model_dir.path());
        let path = exporter.export(&receiver(), 7, write_weights).unwrap();

        assert_eq!(path.parent().unwrap(), model_dir.path().join("export").join("exporter"));
        assert!(path.join("weights.bin").exists());
        assert_eq!(
            LatestExporter::load_signature(&path).unwrap(),
            ServingSignature::for_dims(PatchDimensions::new(4, 2))
        );
        let info: ExportInfo =
            serde_json::from_str(&fs::read_to_string(path.join(EXPORT_INFO_FILE)).unwrap()).unwrap();
        assert_eq!(info.global_step, 7);
        assert_eq!(exporter.latest().unwrap(), Some(path));
    }

    #[test]
    fn keeps_only_newest_exports() {
        let model_dir = tempfile::tempdir().unwrap();
        let exporter = LatestExporter::new("exporter", model_dir.path()).with_exports_to_keep(3);
        let paths: Vec<PathBuf> = (0..5)
            .map(|step| exporter.export(&receiver(), step, write_weights).unwrap())
            .collect();

        assert_eq!(exporter.exports().unwrap(), paths[2..].to_vec());
        assert!(!paths[0].exists());
    }

    #[test]
    fn newest_export_survives_collection() {
        let model_dir = tempfile::tempdir().unwrap();
        let exporter = LatestExporter::new("exporter", model_dir.path()).with_exports_to_keep(2);
        for step in 0..4 {
            let path = exporter.export(&receiver(), step, write_weights).unwrap();
            assert!(path.exists(), "export for step {step} was removed");
            assert_eq!(exporter.latest().unwrap(), Some(path));
        }
        assert_eq!(exporter.exports().unwrap().len(), 2);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let model_dir = tempfile::tempdir().unwrap();
        let exporter = LatestExporter::new("exporter", model_dir.path());
        fs::create_dir_all(exporter.base_dir().join("5000")).unwrap();
        assert_eq!(exporter.next_timestamp(10).unwrap(), 5001);
        assert_eq!(exporter.next_timestamp(6000).unwrap(), 6000);
    }

    #[test]
    fn failed_model_write_leaves_nothing_behind() {
        let model_dir = tempfile::tempdir().unwrap();
        let exporter = LatestExporter::new("exporter", model_dir.path());
        let err = exporter
            .export(&receiver(), 1, |_| Err("disk full".into()))
            .unwrap_err();
        assert!(matches!(err, ExportError::Model(_)));
        assert_eq!(fs::read_dir(exporter.base_dir()).unwrap().count(), 0);
    }
}
