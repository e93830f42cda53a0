//! # VectraDB
//!
//! Embedded vector store core with exact and approximate nearest-neighbor search.
//!
//! VectraDB keeps records of typed columns (scalars, real and complex vectors)
//! in a single [redb](https://docs.rs/redb) file and answers k-nearest-neighbor
//! queries either by an exact (optionally parallel) scan or through secondary
//! indexes such as SuperBit locality-sensitive hashing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vectradb::{ColumnDef, ColumnType, Config, Distance, IndexType, KnnPredicate, VectraDB};
//! use vectradb::index::SuperBitLshConfig;
//!
//! let columns = vec![ColumnDef::new("feature", ColumnType::FloatVector(3))];
//! let db = VectraDB::open("./vectra", &columns, Config::with_parallelism(4))?;
//!
//! let id = db.insert(vec![Some(vec![1.0, 0.0, 0.0].into())])?;
//!
//! // Exact search
//! let query = KnnPredicate::new("feature", 10, vec![1.0, 0.1, 0.0].into(), Distance::Cosine);
//! let neighbors = db.knn(&query)?;
//!
//! // Approximate candidates from an LSH index
//! let params = SuperBitLshConfig::new(16, 4, 42).to_params();
//! db.create_index("feature_lsh", IndexType::SuperBitLsh, &["feature"], &params)?;
//! let index = db.index("feature_lsh")?;
//! let tx = index.begin()?;
//! for m in tx.filter(&query.into())? {
//!     println!("candidate {}", m?.tuple_id);
//! }
//!
//! db.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Entity
//!
//! The **entity** is the record store: a fixed list of [`ColumnDef`]s and
//! records addressed by monotonically assigned [`TupleId`]s.
//!
//! ### Indexes
//!
//! An [`Index`] is a persistent secondary structure in its own store. Work
//! happens in an [`IndexTransaction`]: `rebuild` from a full entity scan,
//! `update` from a [`DataChangeEvent`] (if supported), and `filter` to map a
//! [`Predicate`] to candidate tuple ids. An index that may be out of sync
//! with the entity is **dirty** and refuses to filter until rebuilt.
//!
//! ## Thread Safety
//!
//! `VectraDB` is `Send + Sync` and can be shared across threads using `Arc`.
//! Index filters run concurrently; rebuilds and updates are exclusive per index.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod db;
mod error;
mod types;

pub mod distance;
pub mod index;
pub mod knn;
pub mod storage;
pub mod value;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main database interface
pub use db::{open_index_at, VectraDB};

// Configuration
pub use config::{Config, SyncMode};

// Error handling
pub use error::{
    LifecycleError, NotFoundError, Result, StorageError, ValidationError, VectraError,
};

// Core types
pub use types::{Timestamp, TransactionId, TupleId};
pub use value::{ColumnDef, ColumnType, Complex32, Record, Value};

// Queries
pub use distance::{Distance, DistanceFunction};
pub use knn::{BoundedTopK, CancellationFlag, Candidate, ExactScanExecutor, KnnPredicate, SharedTopK};

// Indexes
pub use index::{
    open_index, Cost, DataChangeEvent, Index, IndexMatch, IndexParams, IndexTransaction,
    IndexType, Predicate,
};

// Storage (for advanced users)
pub use storage::{EntityMetadata, EntitySource, RedbEntityStore};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common VectraDB usage.
///
/// ```rust
/// use vectradb::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, SyncMode};
    pub use crate::db::VectraDB;
    pub use crate::distance::Distance;
    pub use crate::error::{Result, VectraError};
    pub use crate::index::{Index, IndexTransaction, IndexType, Predicate};
    pub use crate::knn::{Candidate, KnnPredicate};
    pub use crate::types::TupleId;
    pub use crate::value::{ColumnDef, ColumnType, Value};
}
