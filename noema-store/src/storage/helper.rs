//! Shared constants and utilities for storage implementations

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::storage::ids::ContentId;

/// Get current unix timestamp in milliseconds
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Compute the content address of a block.
///
/// SHA-256 over the content type's byte length (u64, little endian), the
/// content type, then the body. The length prefix keeps every
/// `(content_type, body)` pair apart, whatever bytes either contains.
pub fn content_address(content_type: &str, body: &[u8]) -> ContentId {
    let mut hasher = Sha256::new();
    hasher.update((content_type.len() as u64).to_le_bytes());
    hasher.update(content_type.as_bytes());
    hasher.update(body);
    ContentId::from_string(hex::encode(hasher.finalize()))
}
