//! Size-based payload compaction for the tiered store
//!
//! Large values are serialized to JSON and LZ4-compressed; reads expand them
//! back before the caller sees them.

use crate::error::{CacheError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{de::DeserializeOwned, Serialize};

/// Stored form of a tiered cache value
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Plain(T),
    Compacted(Vec<u8>),
}

impl<T> Payload<T> {
    pub fn is_compacted(&self) -> bool {
        matches!(self, Payload::Compacted(_))
    }
}

impl<T: Clone + DeserializeOwned> Payload<T> {
    /// Recover the caller's value
    pub fn load(&self) -> Result<T> {
        match self {
            Payload::Plain(value) => Ok(value.clone()),
            Payload::Compacted(bytes) => expand(bytes),
        }
    }
}

/// Serialize and compress a value
pub fn compact<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    Ok(compress_prepend_size(&json))
}

/// Decompress and deserialize a value produced by [`compact`]
pub fn expand<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let json = decompress_size_prepended(bytes)
        .map_err(|e| CacheError::CompressionError(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}
