//! Error types for the Rollgate state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the state store, one per redb failure stage plus the
/// JSON value codec.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("invalid {table} record: {source}")]
    Codec {
        table: &'static str,
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn codec(table: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| StateError::Codec { table, source }
    }
}
