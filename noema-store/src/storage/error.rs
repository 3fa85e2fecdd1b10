//! Storage error taxonomy
//!
//! `NotFound` and `InvalidSelection` are expected, caller-recoverable
//! conditions. `ConcurrentModification` asks the caller to re-resolve and
//! retry; the store never retries on its own. `IntegrityViolation` means an
//! invariant broke and the enclosing write was aborted.

use std::fmt;

use crate::storage::ids::ViewId;

/// Kind of record a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Content,
    Thread,
    Turn,
    Span,
    View,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Content => "content block",
            RecordKind::Thread => "thread",
            RecordKind::Turn => "turn",
            RecordKind::Span => "span",
            RecordKind::View => "view",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("concurrent modification of view {view_id}: expected revision {expected}, found {actual}")]
    ConcurrentModification {
        view_id: ViewId,
        expected: u64,
        actual: u64,
    },

    #[error("relation constraint: {0}")]
    RelationConstraint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    pub fn not_found(kind: RecordKind, id: impl fmt::Display) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for errors the caller can act on (bad id, stale revision)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. }
                | StorageError::InvalidSelection(_)
                | StorageError::ConcurrentModification { .. }
                | StorageError::RelationConstraint(_)
        )
    }
}

#[cfg(feature = "rusqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(anyhow::Error::new(e))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = StorageError::not_found(RecordKind::Span, "span-1");
        assert_eq!(err.to_string(), "span not found: span-1");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_integrity_is_not_recoverable() {
        let err = StorageError::IntegrityViolation("dangling usage".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_conflict_message() {
        let err = StorageError::ConcurrentModification {
            view_id: ViewId::from_string("v1"),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "concurrent modification of view v1: expected revision 2, found 3"
        );
    }
}
