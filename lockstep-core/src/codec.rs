//! Pluggable serialization for frames exchanged between nodes.
//!
//! The envelope contract only requires a self-describing, structurally
//! round-trippable encoding. [`JsonCodec`] is the default; any other serde
//! format can be plugged in by implementing [`MessageCodec`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization format used on the wire.
///
/// `Clone + 'static` so a codec can be copied into every channel worker.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Human readable, which makes captured frames easy to inspect.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeSet;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Layers {
        round: u64,
        layers: Vec<BTreeSet<u32>>,
    }

    #[test]
    fn test_json_codec_nested_sets() {
        let codec = JsonCodec;
        let value = Layers {
            round: 3,
            layers: vec![BTreeSet::from([1, 4]), BTreeSet::new(), BTreeSet::from([2])],
        };

        let bytes = codec.encode(&value).expect("encode should succeed");
        assert_eq!(&bytes, br#"{"round":3,"layers":[[1,4],[],[2]]}"#);

        let decoded: Layers = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec;

        let result: Result<Layers, CodecError> = codec.decode(b"{\"round\":");
        let err = result.expect_err("truncated json must fail");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("decode error"));
    }

    #[test]
    fn test_json_codec_type_mismatch() {
        let codec = JsonCodec;
        let bytes = codec.encode(&"not a struct").expect("encode should succeed");

        let result: Result<Layers, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }
}
