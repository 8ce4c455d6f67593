//! `tf.train.Example` protobuf messages.
//!
//! Field numbers follow `tensorflow/core/example/example.proto` and
//! `feature.proto`, so records written by TensorFlow decode here and vice
//! versa.

use prost::Message;
use std::collections::HashMap;

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    use super::{BytesList, FloatList, Int64List};

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(BytesList),
        #[prost(message, tag = "2")]
        FloatList(FloatList),
        #[prost(message, tag = "3")]
        Int64List(Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

impl Feature {
    pub fn floats(values: Vec<f32>) -> Self {
        Self {
            kind: Some(feature::Kind::FloatList(FloatList { value: values })),
        }
    }

    pub fn int64s(values: Vec<i64>) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value: values })),
        }
    }

    /// Short name of the stored list kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            Some(feature::Kind::BytesList(_)) => "bytes_list",
            Some(feature::Kind::FloatList(_)) => "float_list",
            Some(feature::Kind::Int64List(_)) => "int64_list",
            None => "empty",
        }
    }
}

impl Example {
    /// Decodes a serialized `Example`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Adds or replaces a feature.
    pub fn with_feature(mut self, key: impl Into<String>, feature: Feature) -> Self {
        self.features
            .get_or_insert_with(Features::default)
            .feature
            .insert(key.into(), feature);
        self
    }

    /// Feature stored under `key`.
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.as_ref()?.feature.get(key)
    }

    /// Values of an `int64_list` feature, or `None` if absent or another kind.
    pub fn int64_list(&self, key: &str) -> Option<&[i64]> {
        match &self.feature(key)?.kind {
            Some(feature::Kind::Int64List(list)) => Some(&list.value),
            _ => None,
        }
    }

    /// Values of a `float_list` feature, or `None` if absent or another kind.
    pub fn float_list(&self, key: &str) -> Option<&[f32]> {
        match &self.feature(key)?.kind {
            Some(feature::Kind::FloatList(list)) => Some(&list.value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_respect_kind() {
        let example = Example::default()
            .with_feature("height", Feature::int64s(vec![18]))
            .with_feature("patch", Feature::floats(vec![0.5, 1.0]));

        assert_eq!(example.int64_list("height"), Some(&[18i64][..]));
        assert_eq!(example.float_list("height"), None);
        assert_eq!(example.float_list("patch"), Some(&[0.5f32, 1.0][..]));
        assert_eq!(example.int64_list("missing"), None);
    }

    #[test]
    fn wire_format_matches_tensorflow_layout() {
        // features { feature { key: "a" value { int64_list { value: 1 } } } }
        let example = Example::default().with_feature("a", Feature::int64s(vec![1]));
        let expected: Vec<u8> = vec![
            0x0A, 0x0C, // Example.features, len 12
            0x0A, 0x0A, // Features.feature map entry, len 10
            0x0A, 0x01, b'a', // key
            0x12, 0x05, // value: Feature, len 5
            0x1A, 0x03, // Feature.int64_list, len 3
            0x0A, 0x01, 0x01, // packed value [1]
        ];
        assert_eq!(example.to_bytes(), expected);
        assert_eq!(Example::from_bytes(&expected).unwrap(), example);
    }
}
