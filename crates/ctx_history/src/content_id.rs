//! Content identification, canonical hashing envelope and fragment ids.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A 32-byte BLAKE3 content hash used to identify blobs and content-addressed
/// fragments.
///
/// The same content always produces the same ContentId, which is what lets an
/// archive store a blob once no matter how many contexts reference it.
///
/// # Examples
///
/// ```
/// use ctx_history::ContentId;
///
/// let a = ContentId::of(b"fn main() {}");
/// let b = ContentId::of(b"fn main() {}");
/// assert_eq!(a, b);
/// assert_eq!(a.as_hex().len(), 64);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// The length of a ContentId in bytes.
    pub const LEN: usize = 32;

    /// The length of a ContentId as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Creates a ContentId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the underlying 32-byte BLAKE3 hash.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this ContentId as a lowercase hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Computes the id of a raw blob.
    pub fn of(data: &[u8]) -> Self {
        let canonical = canonical_bytes(ContentKind::Blob, data);
        Self::from_bytes(*blake3::hash(&canonical).as_bytes())
    }

    /// Parses a ContentId from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::InvalidHex` if the string is not valid hex
    /// or is not exactly 64 characters long.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(HistoryError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| HistoryError::InvalidHex(e.to_string()))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HistoryError::InvalidHex("invalid length".to_string()))?;

        Ok(Self(arr))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({}...)", &self.as_hex()[..12])
    }
}

/// Content kind discriminant for the canonical envelope.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContentKind {
    /// Raw bytes (file text, images, diffs)
    Blob = 1,
    /// Field sequence describing a content-addressed fragment
    Fragment = 2,
}

/// Canonical envelope magic bytes.
pub(crate) const MAGIC: &[u8; 5] = b"CTXC1";

/// Constructs canonical bytes for hashing.
///
/// Format:
/// - Magic: "CTXC1" (5 bytes)
/// - Kind: u8 (1 byte)
/// - Length: u64 LE (8 bytes)
/// - Payload: variable bytes
pub(crate) fn canonical_bytes(kind: ContentKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + 1 + 8 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(kind as u8);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental hasher for content-addressed fragments.
///
/// Every field is length-prefixed, so `("ab", "c")` and `("a", "bc")` hash
/// differently.
pub(crate) struct ContentHasher {
    hasher: blake3::Hasher,
}

impl ContentHasher {
    pub(crate) fn new(domain: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(MAGIC);
        hasher.update(&[ContentKind::Fragment as u8]);
        let mut this = Self { hasher };
        this.push(domain.as_bytes());
        this
    }

    fn push(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub(crate) fn bytes(mut self, bytes: &[u8]) -> Self {
        self.push(bytes);
        self
    }

    pub(crate) fn text(self, text: &str) -> Self {
        self.bytes(text.as_bytes())
    }

    pub(crate) fn finish(self) -> ContentId {
        ContentId::from_bytes(*self.hasher.finalize().as_bytes())
    }
}

/// Identifier of a fragment.
///
/// Dynamic fragments get a decimal number from the session's
/// [`FragmentIdCounter`]; content-addressed fragments use the hex of their
/// content hash. Either way the id is fixed at construction.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    /// Wraps an id read back from storage.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub(crate) fn from_content(id: ContentId) -> Self {
        Self(id.as_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric value of a dynamic id, `None` for content hashes.
    pub fn as_number(&self) -> Option<u64> {
        if self.0.len() == ContentId::HEX_LEN {
            return None;
        }
        self.0.parse().ok()
    }

    pub fn is_content_hash(&self) -> bool {
        self.0.len() == ContentId::HEX_LEN && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_content_hash() {
            write!(f, "FragmentId({}...)", &self.0[..12])
        } else {
            write!(f, "FragmentId({})", self.0)
        }
    }
}

/// Allocator for dynamic fragment ids.
///
/// One counter belongs to each [`Session`](crate::Session). Loading an archive
/// calls [`observe`](Self::observe) for every numeric id so freshly created
/// fragments never collide with restored ones.
#[derive(Debug)]
pub struct FragmentIdCounter {
    next: AtomicU64,
}

impl FragmentIdCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> FragmentId {
        FragmentId(self.next.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Makes sure later allocations are strictly greater than `id`.
    pub fn observe(&self, id: &FragmentId) {
        if let Some(n) = id.as_number() {
            self.next.fetch_max(n.saturating_add(1), Ordering::Relaxed);
        }
    }

    /// The value the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Restarts numbering at 1. Tests use this to get deterministic ids.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for FragmentIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
