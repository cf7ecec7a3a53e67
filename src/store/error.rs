//! Store Errors
//!
//! Error types for repository operations.

use uuid::Uuid;

/// Errors that can occur in the repository
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict
    #[error("Version conflict for {entity_id}: expected version {expected}, found {found}")]
    VersionConflict {
        entity_id: Uuid,
        expected: i64,
        found: i64,
    },

    /// Unique key (transaction reference, loan number, id) already taken
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    /// Update of an entity that was never inserted
    #[error("{kind} not found: {id}")]
    MissingEntity { kind: &'static str, id: Uuid },

    /// A writer panicked while holding the store lock
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}
