//! Record sources: glob resolution and lazy multi-file record streams.

use crate::serialization::tfrecord::{open_records, RecordError, RecordReader};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Expands a glob into file paths in the order the glob yields them.
///
/// Entries that cannot be inspected are skipped with a warning.
pub fn resolve_glob(pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let mut files = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-file glob match"),
            Err(e) => warn!(error = %e, "skipping unreadable glob match"),
        }
    }
    Ok(files)
}

/// A set of TFRecord files read back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDataset {
    files: Vec<PathBuf>,
}

impl RecordDataset {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Files matching `pattern`, in sorted order. May be empty.
    pub fn from_glob(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self::new(resolve_glob(pattern)?))
    }

    /// Files in read order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Fresh lazy stream over every record of every file. Files are opened
    /// only when the previous one is exhausted.
    pub fn records(&self) -> RecordStream {
        RecordStream {
            files: self.files.clone().into_iter(),
            current: None,
        }
    }

    /// Endless stream that restarts from the first file after each pass.
    /// Ends if a whole pass produced no records.
    pub fn repeated_records(&self) -> RepeatedRecords {
        RepeatedRecords {
            dataset: self.clone(),
            current: self.records(),
            yielded_this_pass: false,
            epoch: 0,
        }
    }
}

/// See [`RecordDataset::repeated_records`].
pub struct RepeatedRecords {
    dataset: RecordDataset,
    current: RecordStream,
    yielded_this_pass: bool,
    epoch: u64,
}

impl RepeatedRecords {
    /// Number of completed passes.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Iterator for RepeatedRecords {
    type Item = Result<Vec<u8>, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                self.yielded_this_pass = true;
                return Some(item);
            }
            if !self.yielded_this_pass {
                return None;
            }
            self.epoch += 1;
            debug!(epoch = self.epoch, "restarting record stream");
            self.yielded_this_pass = false;
            self.current = self.dataset.records();
        }
    }
}

/// Lazy iterator over the records of several files.
pub struct RecordStream {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<RecordReader<BufReader<File>>>,
}

impl Iterator for RecordStream {
    type Item = Result<Vec<u8>, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            let path = self.files.next()?;
            match open_records(&path) {
                Ok(reader) => self.current = Some(reader),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::tfrecord::create_records;
    use std::fs;

    #[test]
    fn streams_across_files() {
        let dir = tempfile::tempdir().unwrap();
        for (name, records) in [("a.rec", vec!["1", "2"]), ("b.rec", vec![]), ("c.rec", vec!["3"])] {
            let mut writer = create_records(dir.path().join(name)).unwrap();
            for record in records {
                writer.write_record(record.as_bytes()).unwrap();
            }
            writer.flush().unwrap();
        }

        let dataset = RecordDataset::from_glob(&format!("{}/*.rec", dir.path().display())).unwrap();
        assert_eq!(dataset.files().len(), 3);
        let records: Vec<Vec<u8>> = dataset.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);

        // Restartable.
        assert_eq!(dataset.records().count(), 3);
    }

    #[test]
    fn repeated_stream_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = create_records(dir.path().join("a.rec")).unwrap();
        writer.write_record(b"x").unwrap();
        writer.write_record(b"y").unwrap();
        writer.flush().unwrap();

        let dataset = RecordDataset::from_glob(&format!("{}/*.rec", dir.path().display())).unwrap();
        let mut repeated = dataset.repeated_records();
        let first: Vec<Vec<u8>> = repeated.by_ref().take(5).map(Result::unwrap).collect();
        assert_eq!(first[4], b"x".to_vec());
        assert_eq!(repeated.epoch(), 2);
    }

    #[test]
    fn repeated_empty_dataset_ends() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rec"), b"").unwrap();
        let dataset = RecordDataset::from_glob(&format!("{}/*.rec", dir.path().display())).unwrap();
        assert_eq!(dataset.repeated_records().count(), 0);
    }

    #[test]
    fn glob_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub.rec")).unwrap();
        fs::write(dir.path().join("x.rec"), b"").unwrap();
        let files = resolve_glob(&format!("{}/*.rec", dir.path().display())).unwrap();
        assert_eq!(files, vec![dir.path().join("x.rec")]);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(resolve_glob("[").is_err());
    }
}
