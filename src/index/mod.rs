//! Secondary indexes.
//!
//! Every index type implements [`Index`]; all reads and writes go through an
//! [`IndexTransaction`] obtained from [`Index::begin`]. Each index lives in
//! its own redb file (see [`store`]), created through [`IndexType::create`]
//! and reopened through [`open_index`], which dispatches on the type tag
//! stored in the file's header.
//!
//! # Lifecycle
//!
//! ```text
//!   IndexType::create ──► OPEN ──close()──► CLOSED
//!                          │  ▲
//!                 begin()  │  │ commit()/rollback()/drop
//!                          ▼  │
//!                      IndexTransaction
//! ```
//!
//! An index is created dirty (it holds no data yet) and must be rebuilt
//! before it answers queries. Filtering a dirty index fails with
//! [`LifecycleError::StaleIndex`](crate::LifecycleError::StaleIndex).

pub mod hash;
pub mod lsh;

mod lifecycle;
mod matches;
pub mod store;

pub use hash::NonUniqueHashIndex;
pub use lsh::{SamplingMethod, SuperBitLshConfig, SuperBitLshIndex};

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, RangeInclusive};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Result, StorageError, ValidationError};
use crate::knn::KnnPredicate;
use crate::storage::EntitySource;
use crate::types::{Timestamp, TransactionId, TupleId};
use crate::value::{ColumnDef, Record, Value};

use self::store::IndexStore;

/// Type-specific creation parameters, e.g. `{"stages": "2", "buckets": "4"}`.
pub type IndexParams = BTreeMap<String, String>;

/// Lazy sequence of index matches.
pub type MatchIter<'a> = Box<dyn Iterator<Item = Result<IndexMatch>> + 'a>;

// ============================================================================
// Index Family
// ============================================================================

/// The closed set of index algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Non-unique hash index for equality lookups.
    Hash,
    /// SuperBit locality sensitive hashing for approximate kNN.
    SuperBitLsh,
}

impl IndexType {
    /// Returns true if lookups through this index may miss true matches.
    pub fn inexact(&self) -> bool {
        match self {
            Self::Hash => false,
            Self::SuperBitLsh => true,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::SuperBitLsh => "superbit_lsh",
        }
    }

    /// Creates a new index of this type at `path`.
    ///
    /// The store is initialized with header, config and `dirty = true`, then
    /// opened. Fails if a file already exists at `path`.
    #[instrument(skip(columns, params, entity, config), fields(path = %path.as_ref().display()))]
    pub fn create(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        columns: Vec<ColumnDef>,
        params: &IndexParams,
        entity: Arc<dyn EntitySource>,
        config: &Config,
    ) -> Result<Box<dyn Index>> {
        validate_index_name(name)?;
        if columns.is_empty() {
            return Err(ValidationError::required_field("columns").into());
        }
        for column in &columns {
            if !entity.columns().contains(column) {
                return Err(ValidationError::unknown_column(&column.name).into());
            }
        }

        let header = IndexHeader::new(name, *self, columns);
        let index: Box<dyn Index> = match self {
            Self::Hash => Box::new(NonUniqueHashIndex::create(
                path.as_ref(),
                header,
                entity,
                config,
            )?),
            Self::SuperBitLsh => {
                let lsh_config = SuperBitLshConfig::from_params(params)?;
                Box::new(SuperBitLshIndex::create(
                    path.as_ref(),
                    header,
                    lsh_config,
                    entity,
                    config,
                )?)
            }
        };
        debug!(index = name, index_type = %self, "Index created");
        Ok(index)
    }

    /// Opens an existing index of this type.
    ///
    /// Fails with a corruption error if the stored header names another type.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        entity: Arc<dyn EntitySource>,
        config: &Config,
    ) -> Result<Box<dyn Index>> {
        let store = IndexStore::open(path.as_ref(), config)?;
        let header = store.read_header()?;
        if header.index_type != *self {
            return Err(StorageError::corrupted(format!(
                "Index '{}' is of type {}, expected {}",
                header.name, header.index_type, self
            ))
            .into());
        }
        open_with_store(store, header, entity, config)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "superbit_lsh" | "lsh_sb" | "sb_lsh" => Ok(Self::SuperBitLsh),
            other => Err(ValidationError::invalid_field(
                "index_type",
                format!("unknown index type '{}'", other),
            )),
        }
    }
}

/// Opens whatever index lives at `path`, dispatching on its stored type.
pub fn open_index(
    path: impl AsRef<Path>,
    entity: Arc<dyn EntitySource>,
    config: &Config,
) -> Result<Box<dyn Index>> {
    let store = IndexStore::open(path.as_ref(), config)?;
    let header = store.read_header()?;
    open_with_store(store, header, entity, config)
}

fn open_with_store(
    store: IndexStore,
    header: IndexHeader,
    entity: Arc<dyn EntitySource>,
    config: &Config,
) -> Result<Box<dyn Index>> {
    Ok(match header.index_type {
        IndexType::Hash => Box::new(NonUniqueHashIndex::open(store, header, entity, config)?),
        IndexType::SuperBitLsh => Box::new(SuperBitLshIndex::open(store, header, entity, config)?),
    })
}

/// Index names double as file names.
pub(crate) fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ValidationError::required_field("name").into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::invalid_field(
            "name",
            "only ASCII letters, digits, '_' and '-' are allowed",
        )
        .into());
    }
    Ok(())
}

// ============================================================================
// Index Traits
// ============================================================================

/// A secondary index over one entity.
///
/// Implementations are `Send + Sync`; share them behind an `Arc`.
pub trait Index: Send + Sync {
    /// Index name, unique within the entity.
    fn name(&self) -> &str;

    /// Algorithm of this index.
    fn index_type(&self) -> IndexType;

    /// Indexed columns. Never changes after creation.
    fn columns(&self) -> &[ColumnDef];

    /// The immutable header written at creation.
    fn header(&self) -> &IndexHeader;

    /// Location of the index store.
    fn path(&self) -> &Path;

    /// Whether [`IndexTransaction::update`] is implemented.
    fn supports_incremental_update(&self) -> bool;

    /// Whether this index can answer `predicate`.
    fn can_process(&self, predicate: &Predicate) -> bool;

    /// Estimated cost of answering `predicate`.
    ///
    /// [`Cost::INVALID`] if the predicate can't be processed or the index is dirty.
    fn cost(&self, predicate: &Predicate) -> Cost;

    /// Whether the index may be out of sync with the entity.
    fn is_dirty(&self) -> bool;

    /// Whether [`close`](Index::close) has completed.
    fn is_closed(&self) -> bool;

    /// Starts a transaction.
    ///
    /// The transaction keeps the index from being closed until it ends.
    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>>;

    /// Closes the index, waiting up to `Config::close_timeout` for live
    /// transactions. Idempotent.
    fn close(&self) -> Result<()>;
}

/// A unit of work against one index.
///
/// Writes are buffered in a redb write transaction created on first use and
/// become visible on [`commit`](IndexTransaction::commit). Dropping the
/// transaction without committing rolls it back.
pub trait IndexTransaction {
    /// Transaction id, for logs.
    fn id(&self) -> TransactionId;

    /// Same answer as [`Index::can_process`].
    fn can_process(&self, predicate: &Predicate) -> bool;

    /// Discards all content and recomputes it from a full entity scan.
    ///
    /// Clears the dirty flag. Running it twice yields identical content.
    fn rebuild(&mut self) -> Result<()>;

    /// Applies one data change incrementally.
    ///
    /// Fails with [`VectraError::Unsupported`](crate::VectraError::Unsupported)
    /// and changes nothing if the index only supports full rebuilds.
    fn update(&mut self, event: &DataChangeEvent) -> Result<()>;

    /// Marks the index as out of sync.
    fn mark_dirty(&mut self) -> Result<()>;

    /// Looks up matches for `predicate`.
    ///
    /// The sequence is lazy and single-pass. Fails up front with
    /// `ValidationError::UnsupportedPredicate` if
    /// [`can_process`](IndexTransaction::can_process) is false, and with
    /// `LifecycleError::StaleIndex` if the index is dirty.
    fn filter(&self, predicate: &Predicate) -> Result<MatchIter<'_>>;

    /// Like [`filter`](IndexTransaction::filter), restricted to tuple ids in `range`.
    fn filter_range(
        &self,
        predicate: &Predicate,
        range: RangeInclusive<TupleId>,
    ) -> Result<MatchIter<'_>>;

    /// Makes this transaction's writes durable and visible.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards this transaction's writes.
    fn rollback(self: Box<Self>) -> Result<()>;
}

// ============================================================================
// Supporting Types
// ============================================================================

/// Header stored in every index file.
///
/// Written once at creation, read at every open, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    /// Index name.
    pub name: String,
    /// Algorithm tag.
    pub index_type: IndexType,
    /// Indexed columns.
    pub columns: Vec<ColumnDef>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl IndexHeader {
    /// Creates a header stamped with the current time.
    pub fn new(name: impl Into<String>, index_type: IndexType, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            index_type,
            columns,
            created_at: Timestamp::now(),
        }
    }
}

/// A predicate an index may be able to answer.
#[derive(Clone, Debug)]
pub enum Predicate {
    /// Nearest-neighbor query.
    Knn(KnnPredicate),
    /// Equality lookup: records whose `column` equals any of `values`.
    ///
    /// Matches carry the position of the value they matched as `query_index`.
    Equals {
        /// Column to compare.
        column: String,
        /// Lookup values.
        values: Vec<Value>,
    },
}

impl Predicate {
    /// Creates an equality predicate.
    pub fn equals(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::Equals {
            column: column.into(),
            values,
        }
    }

    /// Column the predicate targets.
    pub fn column(&self) -> &str {
        match self {
            Self::Knn(knn) => &knn.column,
            Self::Equals { column, .. } => column,
        }
    }
}

impl From<KnnPredicate> for Predicate {
    fn from(p: KnnPredicate) -> Self {
        Self::Knn(p)
    }
}

/// One index match: a tuple id and the query (vector or value) it matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexMatch {
    /// Matching record.
    pub tuple_id: TupleId,
    /// Position of the query vector (or lookup value) that produced it.
    pub query_index: usize,
}

/// A change to one record, carried with full records.
#[derive(Clone, Debug, PartialEq)]
pub enum DataChangeEvent {
    /// A record was inserted.
    Insert {
        /// The inserted record.
        new: Record,
    },
    /// A record was replaced.
    Update {
        /// Before the change.
        old: Record,
        /// After the change.
        new: Record,
    },
    /// A record was deleted.
    Delete {
        /// The deleted record.
        old: Record,
    },
}

impl DataChangeEvent {
    /// Id of the affected record.
    pub fn tuple_id(&self) -> TupleId {
        match self {
            Self::Insert { new } => new.tuple_id,
            Self::Update { new, .. } => new.tuple_id,
            Self::Delete { old } => old.tuple_id,
        }
    }
}

/// Estimated cost of answering a predicate through an index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cost {
    /// Storage reads.
    pub io: f64,
    /// Computation.
    pub cpu: f64,
    /// Memory held while answering.
    pub memory: f64,
}

impl Cost {
    /// Free.
    pub const ZERO: Cost = Cost {
        io: 0.0,
        cpu: 0.0,
        memory: 0.0,
    };

    /// The index cannot (or must not) answer the predicate.
    pub const INVALID: Cost = Cost {
        io: f64::INFINITY,
        cpu: f64::INFINITY,
        memory: f64::INFINITY,
    };

    /// Creates a cost.
    pub const fn new(io: f64, cpu: f64, memory: f64) -> Self {
        Self { io, cpu, memory }
    }

    /// Returns true for [`Cost::INVALID`].
    pub fn is_invalid(&self) -> bool {
        self.io.is_infinite() || self.cpu.is_infinite() || self.memory.is_infinite()
    }

    /// Sum of all components.
    pub fn total(&self) -> f64 {
        self.io + self.cpu + self.memory
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.io + rhs.io, self.cpu + rhs.cpu, self.memory + rhs.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Distance;

    #[test]
    fn test_index_type_from_str() {
        assert_eq!("hash".parse::<IndexType>().unwrap(), IndexType::Hash);
        assert_eq!(
            "SUPERBIT_LSH".parse::<IndexType>().unwrap(),
            IndexType::SuperBitLsh
        );
        assert_eq!("lsh_sb".parse::<IndexType>().unwrap(), IndexType::SuperBitLsh);
        assert!("btree".parse::<IndexType>().is_err());
    }

    #[test]
    fn test_index_type_inexact() {
        assert!(!IndexType::Hash.inexact());
        assert!(IndexType::SuperBitLsh.inexact());
        assert_eq!(IndexType::SuperBitLsh.to_string(), "superbit_lsh");
    }

    #[test]
    fn test_validate_index_name() {
        assert!(validate_index_name("features_lsh-1").is_ok());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("../escape").is_err());
        assert!(validate_index_name("has space").is_err());
    }

    #[test]
    fn test_cost() {
        assert!(Cost::INVALID.is_invalid());
        assert!(!Cost::ZERO.is_invalid());
        let c = Cost::new(1.0, 2.0, 3.0) + Cost::new(1.0, 1.0, 1.0);
        assert_eq!(c, Cost::new(2.0, 3.0, 4.0));
        assert_eq!(c.total(), 9.0);
    }

    #[test]
    fn test_predicate_column() {
        let knn = KnnPredicate::new("feature", 1, vec![1.0].into(), Distance::Cosine);
        assert_eq!(Predicate::from(knn).column(), "feature");
        assert_eq!(Predicate::equals("id", vec![Value::Long(1)]).column(), "id");
    }

    #[test]
    fn test_data_change_event_tuple_id() {
        let r = Record::new(TupleId::new(4), vec![]);
        assert_eq!(
            DataChangeEvent::Delete { old: r.clone() }.tuple_id(),
            TupleId::new(4)
        );
        assert_eq!(DataChangeEvent::Insert { new: r }.tuple_id(), TupleId::new(4));
    }

    #[test]
    fn test_header_serialization() {
        let header = IndexHeader::new("idx", IndexType::Hash, vec![]);
        let bytes = bincode::serialize(&header).unwrap();
        let restored: IndexHeader = bincode::deserialize(&bytes).unwrap();
        assert_eq!(header, restored);
    }
}
