use std::fmt::Display;

pub(crate) use xfer_bridge_domain::storage::StorageError;

/// A persisted value no longer parses into its domain type.
pub(crate) fn corrupt(column: &str, err: impl Display) -> StorageError {
    StorageError::Database(format!("corrupt `{column}` value: {err}"))
}
