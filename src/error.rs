//! Error types for VectraDB.
//!
//! VectraDB uses a hierarchical error system:
//! - `VectraError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`, `LifecycleError`)
//!   provide detail
//!
//! The variants map onto the failure classes of the query core:
//!
//! | Class        | Variant                          | Retried? |
//! |--------------|----------------------------------|----------|
//! | Precondition | [`VectraError::Validation`]      | never    |
//! | Lifecycle    | [`VectraError::Lifecycle`]       | never    |
//! | Capability   | [`VectraError::Unsupported`]     | never    |
//! | Type         | [`VectraError::Type`]            | never    |
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use vectradb::{VectraDB, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let db = VectraDB::open("./vectra", columns, Config::default())?;
//!     // ... operations that may fail ...
//!     db.close()?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for VectraDB operations.
pub type Result<T> = std::result::Result<T, VectraError>;

/// Top-level error enum for all VectraDB operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum VectraError {
    /// Storage layer error (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error (a violated precondition).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Index lifecycle error (closed index, lock timeout, stale content).
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// Requested object not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The index type does not implement the requested operation.
    ///
    /// Raised for example by `update()` on an index that only supports
    /// full rebuilds. Callers should route to `rebuild()` instead.
    #[error("Operation '{operation}' is not supported by index '{index}'")]
    Unsupported {
        /// Name of the index.
        index: String,
        /// The rejected operation.
        operation: String,
    },

    /// A column yielded a value of an unexpected type.
    #[error("Type error in column '{column}': expected {expected}, found {found}")]
    Type {
        /// Column that produced the value.
        column: String,
        /// Expected value type.
        expected: String,
        /// Actual value type.
        found: String,
    },

    /// The operation was cancelled before completion; partial results were discarded.
    #[error("Operation cancelled")]
    Cancelled,
}

impl VectraError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a capability error for an unsupported index operation.
    pub fn unsupported(index: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            index: index.into(),
            operation: operation.into(),
        }
    }

    /// Creates a type error for a column value.
    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::Type {
            column: column.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a lifecycle error.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }

    /// Returns true if this is an unsupported-operation error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Returns true if this is a type error.
    pub fn is_type(&self) -> bool {
        matches!(self, Self::Type { .. })
    }

    /// Returns true if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the underlying storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database file or data is corrupted.
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// Database file not found at expected path.
    #[error("Database not found: {0}")]
    DatabaseNotFound(PathBuf),

    /// Database is locked by another process.
    #[error("Database is locked by another writer")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Database schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in database.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

// Conversions from redb error types
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to VectraError for convenience
impl From<redb::Error> for VectraError {
    fn from(err: redb::Error) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<redb::DatabaseError> for VectraError {
    fn from(err: redb::DatabaseError) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<redb::TransactionError> for VectraError {
    fn from(err: redb::TransactionError) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for VectraError {
    fn from(err: redb::CommitError) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for VectraError {
    fn from(err: redb::TableError) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for VectraError {
    fn from(err: redb::StorageError) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

impl From<bincode::Error> for VectraError {
    fn from(err: bincode::Error) -> Self {
        VectraError::Storage(StorageError::from(err))
    }
}

/// Validation errors for caller-supplied input.
///
/// These are programmer errors: reported immediately, never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector dimension doesn't match the column's declared dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from the column definition.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Selection index past the number of retained elements.
    #[error("Index {index} is out of bounds for a selection of size {len}")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Number of elements available.
        len: usize,
    },

    /// The predicate shape cannot be processed by the index.
    #[error("Index '{index}' cannot process predicate: {reason}")]
    UnsupportedPredicate {
        /// Name of the index.
        index: String,
        /// Why the predicate was rejected.
        reason: String,
    },

    /// A column name doesn't exist in the entity.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Stored column definitions don't match the ones supplied on open.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates an out-of-range selection error.
    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Creates an unsupported predicate error.
    pub fn unsupported_predicate(index: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedPredicate {
            index: index.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown column error.
    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn(name.into())
    }
}

/// Errors raised by index lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The index has been closed; no new transactions can be opened.
    #[error("Index '{0}' is closed")]
    IndexClosed(String),

    /// The exclusive structural lock could not be acquired in time.
    ///
    /// Fatal: it means some transaction on the index was never released.
    #[error("Could not close index '{index}' within {timeout:?}: a transaction was not released")]
    LockTimeout {
        /// Name of the index.
        index: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The index is marked dirty and must be rebuilt before it can answer queries.
    #[error("Index '{0}' is dirty and must be rebuilt before use")]
    StaleIndex(String),

    /// An index store already exists at the target location.
    #[error("Index already exists: {0}")]
    IndexExists(String),
}

/// Not found errors for specific object types.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Index with given name not found.
    #[error("Index not found: {0}")]
    Index(String),

    /// Record with given tuple id not found.
    #[error("Record not found: {0}")]
    Record(String),
}

impl NotFoundError {
    /// Creates an index not found error.
    pub fn index(name: impl ToString) -> Self {
        Self::Index(name.to_string())
    }

    /// Creates a record not found error.
    pub fn record(id: impl ToString) -> Self {
        Self::Record(id.to_string())
    }
}
