//! Storage layer abstractions for VectraDB.
//!
//! Query execution and index builds read records through the
//! [`EntitySource`] trait. The production implementation is
//! [`RedbEntityStore`], which keeps records in a redb file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VectraDB                                │
//! │            │                          │                      │
//! │            ▼                          ▼                      │
//! │   ExactScanExecutor            Index::begin().rebuild()      │
//! │            │                          │                      │
//! │            └──────────┬───────────────┘                      │
//! │                       ▼                                      │
//! │              ┌─────────────────────┐                         │
//! │              │    EntitySource     │  ← Trait                │
//! │              └─────────────────────┘                         │
//! │                       ▲                                      │
//! │              ┌────────┴────────┐                             │
//! │              │ RedbEntityStore │                             │
//! │              └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod redb;
pub mod schema;

pub use self::redb::RedbEntityStore;
pub use schema::{EntityMetadata, SCHEMA_VERSION};

use std::ops::RangeInclusive;

use crate::error::{Result, ValidationError};
use crate::types::TupleId;
use crate::value::{ColumnDef, Record};

/// Callback invoked once per record by [`EntitySource::scan`].
///
/// Returning an error stops the scan and propagates the error.
pub type RecordVisitor<'a> = dyn FnMut(Record) -> Result<()> + 'a;

/// Read access to the records of one entity.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; parallel scans call [`scan`]
/// from several threads at once, each call using its own read snapshot.
///
/// [`scan`]: EntitySource::scan
pub trait EntitySource: Send + Sync {
    /// Column definitions, positional.
    fn columns(&self) -> &[ColumnDef];

    /// Largest tuple id currently stored, `None` for an empty entity.
    fn max_tuple_id(&self) -> Result<Option<TupleId>>;

    /// Number of stored records.
    fn count(&self) -> Result<u64>;

    /// Reads one record.
    fn read(&self, id: TupleId) -> Result<Option<Record>>;

    /// Visits every record whose id falls into `range`, in tuple id order.
    fn scan(&self, range: RangeInclusive<TupleId>, visitor: &mut RecordVisitor<'_>) -> Result<()>;

    /// Visits every record, in tuple id order.
    fn scan_all(&self, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        match self.max_tuple_id()? {
            Some(max) => self.scan(TupleId::FIRST..=max, visitor),
            None => Ok(()),
        }
    }

    /// Position of a column by name.
    fn column_position(&self, name: &str) -> Result<usize> {
        self.columns()
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ValidationError::unknown_column(name).into())
    }
}
