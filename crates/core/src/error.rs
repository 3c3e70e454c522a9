use crate::value::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EpochError {
    /// Mutation attempted on a non-current or deleted element, or on an
    /// immutable graph.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Write to a property name the graph keeps for itself.
    #[error("reserved property key: {0:?}")]
    ReservedKey(String),
    /// A value with no mapping to a store-level value type.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),
    /// Direct element diff requested on two different identities.
    #[error("cannot compare element {left} with element {right}")]
    IncomparableElements { left: EntityId, right: EntityId },
    /// The atomic commit failed; nothing from it is visible.
    #[error("commit failed: {0}")]
    StoreCommit(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl From<redb::DatabaseError> for EpochError {
    fn from(e: redb::DatabaseError) -> Self {
        EpochError::Storage(e.to_string())
    }
}
impl From<redb::TransactionError> for EpochError {
    fn from(e: redb::TransactionError) -> Self {
        EpochError::Storage(e.to_string())
    }
}
impl From<redb::TableError> for EpochError {
    fn from(e: redb::TableError) -> Self {
        EpochError::Storage(e.to_string())
    }
}
impl From<redb::StorageError> for EpochError {
    fn from(e: redb::StorageError) -> Self {
        EpochError::Storage(e.to_string())
    }
}
impl From<redb::CommitError> for EpochError {
    fn from(e: redb::CommitError) -> Self {
        EpochError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EpochError>;
