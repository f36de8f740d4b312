//! Error types for ctx_history operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for ctx_history operations.
///
/// Unresolved symbols, missing files and slow content are not errors: they
/// surface as empty snapshots or fallback text. Only archive failures and
/// broken invariants end up here.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// No archive exists at the given path.
    #[error("history archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// The archive exists but cannot be decoded.
    #[error("corrupted history archive at {}: {}", path.display(), reason)]
    ArchiveCorrupted {
        /// Path to the archive
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// The archive does not match any known layout.
    #[error("unsupported history archive format at {}: {}", path.display(), reason)]
    UnsupportedFormat {
        /// Path to the archive
        path: PathBuf,
        /// What was found instead
        reason: String,
    },

    /// Migration left frozen placeholder fragments that could not be expanded.
    #[error("migration left {} unexpanded placeholder fragment(s): {}", ids.len(), ids.join(", "))]
    UnexpandedPlaceholders {
        /// Ids of the placeholders, in archive order
        ids: Vec<String>,
    },

    /// A context record references a fragment the archive does not define.
    #[error("context {context} references unknown fragment {fragment}")]
    MissingFragment {
        /// Context id
        context: String,
        /// Fragment id
        fragment: String,
    },

    /// Content referenced by id is absent from the store.
    #[error("content not found: {0}")]
    ContentNotFound(String),

    /// Hash verification failed while reading content.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The expected content id
        expected: String,
        /// The actual computed hash
        actual: String,
    },

    /// Invalid hex string for ContentId parsing.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Serialization error while writing archive records.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error while reading archive records.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A history needs at least one context.
    #[error("history must contain at least one context")]
    EmptyHistory,

    /// Two histories share no common first context.
    #[error("histories share no common prefix and cannot be merged")]
    NoCommonPrefix,

    /// A task entry carries neither a log nor a summary.
    #[error("task entry {sequence} has neither a log nor a summary")]
    InvalidTaskEntry {
        /// Sequence number of the offending entry
        sequence: u32,
    },
}

impl HistoryError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ArchiveCorrupted { .. } | Self::HashMismatch { .. } => {
                Some("The archive is damaged. Restore it from a backup or start a fresh history.")
            }
            Self::UnexpandedPlaceholders { .. } => Some(
                "The legacy archive is missing metadata for these fragments. Keep the original file and report the ids.",
            ),
            Self::UnsupportedFormat { .. } => {
                Some("The archive was written by an unknown version. Upgrade before loading it.")
            }
            Self::ConfigError(_) => Some("Check history.toml for typos or remove it to use defaults."),
            Self::NoCommonPrefix => {
                Some("Both histories must start from the same session. Load one of them instead of merging.")
            }
            _ => None,
        }
    }
}

/// Convenience Result type for ctx_history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
