//! TFRecord container framing.
//!
//! Each record is stored as:
//!
//! ```text
//! u64  length          (little endian)
//! u32  masked_crc32c(length bytes)
//! [u8] data[length]
//! u32  masked_crc32c(data)
//! ```

use super::checksum::masked_crc32c;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while reading or decoding records.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot open record file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("corrupt record {what}: crc {actual:#010x} != stored {expected:#010x}")]
    Checksum {
        what: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("record too large: {0} bytes")]
    TooLarge(u64),
}

type Result<T> = std::result::Result<T, RecordError>;

// Upper bound on a single record; anything larger is treated as corruption.
const MAX_RECORD_LEN: u64 = 1 << 30;

/// Lazy iterator over the records of one TFRecord stream.
///
/// A clean end of stream at a frame boundary ends iteration. Any framing
/// error is yielded once, after which the iterator is exhausted.
pub struct RecordReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; 8];
        let got = read_fully(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < header.len() {
            return Err(RecordError::Truncated {
                expected: header.len(),
                actual: got,
            });
        }

        let len_crc = self.read_u32()?;
        let actual = masked_crc32c(&header);
        if actual != len_crc {
            return Err(RecordError::Checksum {
                what: "length",
                expected: len_crc,
                actual,
            });
        }

        let len = u64::from_le_bytes(header);
        if len > MAX_RECORD_LEN {
            return Err(RecordError::TooLarge(len));
        }
        let mut data = vec![0u8; len as usize];
        let got = read_fully(&mut self.inner, &mut data)?;
        if got < data.len() {
            return Err(RecordError::Truncated {
                expected: data.len(),
                actual: got,
            });
        }

        let data_crc = self.read_u32()?;
        let actual = masked_crc32c(&data);
        if actual != data_crc {
            return Err(RecordError::Checksum {
                what: "data",
                expected: data_crc,
                actual,
            });
        }
        Ok(Some(data))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        let got = read_fully(&mut self.inner, &mut buf)?;
        if got < buf.len() {
            return Err(RecordError::Truncated {
                expected: buf.len(),
                actual: got,
            });
        }
        Ok(u32::from_le_bytes(buf))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Opens a TFRecord file for lazy reading.
pub fn open_records<P: AsRef<Path>>(path: P) -> Result<RecordReader<BufReader<File>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| RecordError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(RecordReader::new(BufReader::new(file)))
}

/// Writes TFRecord frames.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Appends one framed record: length, length CRC, data, data CRC.
    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let header = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&header)?;
        self.inner.write_all(&masked_crc32c(&header).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc32c(data).to_le_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Creates (or truncates) a TFRecord file for writing.
pub fn create_records<P: AsRef<Path>>(path: P) -> io::Result<RecordWriter<BufWriter<File>>> {
    Ok(RecordWriter::new(BufWriter::new(File::create(path)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(records: &[&[u8]]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn reads_back_written_frames() {
        let bytes = framed(&[b"first", b"", b"third record"]);
        let records: Vec<Vec<u8>> = RecordReader::new(Cursor::new(bytes))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), b"third record".to_vec()]);
    }

    #[test]
    fn empty_stream_has_no_records() {
        let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.next().is_none());
    }

    #[test]
    fn corrupt_payload_is_reported_once() {
        let mut bytes = framed(&[b"payload"]);
        bytes[12] ^= 0xFF;
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.next(),
            Some(Err(RecordError::Checksum { what: "data", .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut bytes = framed(&[b"payload"]);
        bytes.truncate(bytes.len() - 6);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(reader.next(), Some(Err(RecordError::Truncated { .. }))));
    }

    #[test]
    fn garbage_header_fails_length_check() {
        let mut reader = RecordReader::new(Cursor::new(b"not a tfrecord file".to_vec()));
        assert!(matches!(
            reader.next(),
            Some(Err(RecordError::Checksum { what: "length", .. }))
        ));
    }
}
