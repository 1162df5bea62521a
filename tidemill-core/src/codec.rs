//! Opaque encode/decode boundary used for tuples and checkpoint payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Symmetric codec: `decode(encode(v))` must behave like `v`. No partitioning.
pub trait StreamCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Default codec for anything serde can handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> StreamCodec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Encode with the default codec.
pub fn encode<T: Serialize + DeserializeOwned>(value: &T) -> Result<Vec<u8>, CodecError> {
    BincodeCodec.encode(value)
}

/// Decode with the default codec.
pub fn decode<T: Serialize + DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    BincodeCodec.decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let bytes = encode(&(7u64, "seven".to_string())).unwrap();
        let err = decode::<(u64, String)>(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_codec_is_usable_as_trait_object() {
        let codec: Box<dyn StreamCodec<Vec<u32>>> = Box::new(BincodeCodec);
        let bytes = codec.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), vec![1, 2, 3]);
    }
}
