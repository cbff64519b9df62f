//! Payload and result serialization.
//!
//! The queue treats payloads and results as opaque byte blobs. How those
//! blobs are produced is up to the [`Serializer`] the queue was built with;
//! [`JsonSerializer`] is the default.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::QueueError;

/// Converts task payloads and results to and from their stored byte form.
///
/// Producers and consumers of the same queue must agree on the serializer,
/// since the bytes written by one are decoded by the other.
pub trait Serializer: Send + Sync {
    /// Encodes a value into the blob stored in Redis.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, QueueError>;

    /// Decodes a blob read from Redis.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, QueueError>;
}

/// JSON serializer, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(value).map_err(|e| QueueError::Serialization(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, QueueError> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::Serialization(Box::new(e)))
    }
}
