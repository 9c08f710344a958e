use crate::resources::ObjectKey;

/// Errors that can occur during object store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("object already exists: {0}")]
    AlreadyExists(ObjectKey),

    /// Every owner referenced by a new object has been deleted.
    #[error("owner of {0} no longer exists")]
    OwnerGone(ObjectKey),

    /// The caller's copy is stale; re-fetch and retry the whole step.
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("serialization error for {kind}: {source}")]
    Serialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_owner_gone(&self) -> bool {
        matches!(self, StoreError::OwnerGone(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}
