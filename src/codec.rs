//! Row codecs.
//!
//! A codec turns a value into the bytes stored in a backend row and back.
//! Both directions must be pure: the store relies on `decode(encode(v)) == v`
//! for write deduplication.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Encodes and decodes values to and from row bytes.
pub trait Codec<V>: Send + Sync + 'static {
    fn encode(&self, value: &V) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<V>;
}

/// JSON rows via `serde_json`.
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<V> {
        serde_json::from_slice(data).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

/// Compact MessagePack rows via `rmp-serde`.
pub struct MessagePackCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> MessagePackCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for MessagePackCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> for MessagePackCodec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        // Named fields keep rows readable across field reordering.
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<V> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Sample>::new();
        let value = Sample {
            id: 7,
            name: "seven".to_string(),
        };

        let data = codec.encode(&value).unwrap();
        assert_eq!(data, br#"{"id":7,"name":"seven"}"#.to_vec());
        assert_eq!(codec.decode(&data).unwrap(), value);
    }

    #[test]
    fn test_json_codec_rejects_malformed_row() {
        let codec = JsonCodec::<Sample>::new();
        let result = codec.decode(b"{\"id\": \"not a number\"}");
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_json_codec_unencodable_value_is_encode_error() {
        // JSON object keys must be strings
        let codec = JsonCodec::<HashMap<(u8, u8), u8>>::new();
        let value = HashMap::from([((1, 2), 3)]);

        let result = codec.encode(&value);
        assert!(matches!(result, Err(StoreError::Encode(_))));
    }

    #[test]
    fn test_msgpack_codec_rejects_truncated_row() {
        let codec = MessagePackCodec::<Sample>::new();
        let value = Sample {
            id: 1,
            name: "one".to_string(),
        };

        let data = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&data).unwrap(), value);

        let result = codec.decode(&data[..data.len() - 2]);
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }
}
