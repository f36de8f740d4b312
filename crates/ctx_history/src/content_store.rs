//! Append-only content-addressed blob map.
//!
//! The same store type backs two things: the in-memory pool that fragment
//! text is materialized into while an archive loads, and the pool of blobs an
//! archive writer collects before emitting `content/<id>` entries.

use crate::content_id::ContentId;
use crate::error::{HistoryError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// Maximum decoded blob size (100 MB).
pub const MAX_BLOB_SIZE: usize = 100 * 1024 * 1024;

/// Thread-safe map from [`ContentId`] to bytes.
///
/// Keys are derived from the bytes, so a key can never be rebound to
/// different content: [`insert`](Self::insert) verifies the hash and `put`
/// computes it.
///
/// # Examples
///
/// ```
/// use ctx_history::ContentStore;
///
/// let store = ContentStore::new();
/// let a = store.put(b"shared");
/// let b = store.put(b"shared");
/// assert_eq!(a, b);
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: RwLock<HashMap<ContentId, Arc<[u8]>>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes and returns their id. Storing the same bytes twice is a no-op.
    pub fn put(&self, data: &[u8]) -> ContentId {
        let id = ContentId::of(data);
        if self.blobs.read().contains_key(&id) {
            return id;
        }
        self.blobs.write().entry(id).or_insert_with(|| Arc::from(data));
        id
    }

    pub fn put_text(&self, text: &str) -> ContentId {
        self.put(text.as_bytes())
    }

    /// Stores bytes under an id read from elsewhere, verifying the hash.
    pub fn insert(&self, id: ContentId, data: Vec<u8>) -> Result<()> {
        let actual = ContentId::of(&data);
        if actual != id {
            return Err(HistoryError::HashMismatch {
                expected: id.as_hex(),
                actual: actual.as_hex(),
            });
        }
        self.blobs.write().entry(id).or_insert_with(|| Arc::from(data));
        Ok(())
    }

    pub fn get(&self, id: &ContentId) -> Option<Arc<[u8]>> {
        self.blobs.read().get(id).cloned()
    }

    /// Returns the blob as UTF-8 text.
    pub fn get_text(&self, id: &ContentId) -> Result<String> {
        let bytes = self
            .get(id)
            .ok_or_else(|| HistoryError::ContentNotFound(id.as_hex()))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HistoryError::Deserialization(format!("content {} is not UTF-8: {}", id, e)))
    }

    pub fn get_bytes(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.get(id)
            .map(|b| b.to_vec())
            .ok_or_else(|| HistoryError::ContentNotFound(id.as_hex()))
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.blobs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// All ids in ascending order.
    pub fn ids(&self) -> Vec<ContentId> {
        let mut ids: Vec<_> = self.blobs.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Compresses a blob for storage in an archive.
pub(crate) fn encode_blob(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| HistoryError::Compression(e.to_string()))
}

/// Decompresses an archived blob and checks it against its id.
pub(crate) fn decode_blob(id: ContentId, compressed: &[u8]) -> Result<Vec<u8>> {
    let decoder =
        zstd::Decoder::new(compressed).map_err(|e| HistoryError::Compression(e.to_string()))?;
    let mut data = Vec::new();
    let read = decoder
        .take(MAX_BLOB_SIZE as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|e| HistoryError::Compression(e.to_string()))?;
    if read > MAX_BLOB_SIZE {
        return Err(HistoryError::Compression(format!(
            "blob {} exceeds {} bytes",
            id, MAX_BLOB_SIZE
        )));
    }

    let actual = ContentId::of(&data);
    if actual != id {
        return Err(HistoryError::HashMismatch {
            expected: id.as_hex(),
            actual: actual.as_hex(),
        });
    }
    Ok(data)
}
