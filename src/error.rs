//! Error taxonomy for schema derivation, query building and storage access.
//!
//! Schema and query errors are raised locally before any statement reaches
//! the database. Storage errors wrap whatever the storage client reported.

use std::fmt::Display;
use thiserror::Error;

/// A model type declared a field list that cannot be mapped to a table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("entity `{entity}` declares no persistable fields")]
    NoFields { entity: String },

    #[error("entity `{entity}`: fields `{first}` and `{second}` map to the same column")]
    DuplicateColumn {
        entity: String,
        first: String,
        second: String,
    },

    #[error("entity `{entity}`: field `{field}` collides with the reserved `objectID` column")]
    ReservedColumn { entity: String, field: String },

    #[error("entity `{entity}`: `{name}` is not a valid table or column name")]
    InvalidIdentifier { entity: String, name: String },
}

/// Pagination inputs that cannot produce a well-formed LIMIT/OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidQueryError {
    #[error("page index must not be negative (got {0})")]
    NegativePageIndex(i64),

    #[error("page size must be positive (got {0})")]
    NonPositivePageSize(i64),

    #[error("offset of page {index} with page size {size} overflows")]
    OffsetOverflow { index: i64, size: i64 },
}

/// Failure reported by the storage client, with its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage operation '{operation}' failed: {message}")]
pub struct StorageError {
    pub operation: String,
    pub message: String,
}

impl StorageError {
    pub fn new(operation: impl Into<String>, cause: impl Display) -> Self {
        Self {
            operation: operation.into(),
            message: cause.to_string(),
        }
    }
}

/// Any error surfaced by the entity store.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    InvalidQuery(#[from] InvalidQueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
