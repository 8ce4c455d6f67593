//! On-disk formats.
//!
//! - **TFRecord**: length-prefixed, CRC32C-checked record framing
//! - **Example**: the `tf.train.Example` protobuf carried in each record
//! - **SafeTensors**: batch snapshots for inspection
//!
//! ```rust,ignore
//! use glyph_patches::serialization::{open_records, Example};
//!
//! for record in open_records("train-00000.tfrecords")? {
//!     let example = Example::from_bytes(&record?)?;
//!     println!("{:?}", example.int64_list("label"));
//! }
//! ```

pub mod checksum;
pub mod example;
pub mod safetensors_io;
pub mod tfrecord;

pub use example::{Example, Feature, Features};
pub use safetensors_io::{load_batch, save_batch, tensor_info, SafeTensorsError};
pub use tfrecord::{create_records, open_records, RecordError, RecordReader, RecordWriter};
