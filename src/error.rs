//! Error types for trueno-results
//!
//! A missing key is not an error: lookups return `Ok(None)`. Everything here is
//! a real failure, split by whether it happened on the canonical path (always
//! surfaced) or on a derived path (logged and reported in a `DerivedOutcome`).

use std::fmt;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Store operation that failed, attached to [`Error::Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    /// Writing a record (temp file, fsync or rename).
    Save,
    /// Reading a record.
    Load,
    /// Removing a record or subtree.
    Delete,
    /// Enumerating keys.
    List,
    /// Copying or rotating backups.
    Backup,
}

impl StorageOp {
    /// Operation name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Load => "load",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// trueno-results error types
#[derive(Error, Debug)]
pub enum Error {
    /// Disk or permission failure on a required operation
    #[error("Storage error during {op} of '{key}': {source}")]
    Storage {
        /// Key (or path) the operation targeted
        key: String,
        /// Operation that failed
        op: StorageOp,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Persisted value could not be encoded or decoded
    #[error("Serialization error for '{key}': {message}")]
    Serialization {
        /// Key of the unreadable record
        key: String,
        /// Decoder message
        message: String,
    },

    /// Manifest entry disagrees with the file it describes
    #[error("Integrity check failed for '{url}': {message}")]
    Integrity {
        /// Asset URL of the entry
        url: String,
        /// What did not match
        message: String,
    },

    /// Columnar codec failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Caller passed something unusable (bad key, broken invariant)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn storage(key: impl Into<String>, op: StorageOp, source: std::io::Error) -> Self {
        Self::Storage {
            key: key.into(),
            op,
            source,
        }
    }

    pub(crate) fn serialization(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Serialization {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// True for corrupt or undecodable persisted values.
    ///
    /// Read paths treat these as "not found" after logging them.
    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_carries_key_and_op() {
        let err = Error::storage(
            "experiments/e1/summary",
            StorageOp::Save,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("save"));
        assert!(msg.contains("experiments/e1/summary"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_serialization_classification() {
        let err = Error::serialization("k", "unexpected EOF");
        assert!(err.is_serialization());
        assert!(!Error::Other("x".to_string()).is_serialization());
    }
}
