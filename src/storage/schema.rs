//! Database schema definitions and versioning.
//!
//! This module defines the table structure for both kinds of redb files
//! VectraDB writes: the entity file holding records, and one index store
//! file per index. All table definitions are compile-time constants,
//! except the per-stage LSH tables whose names are derived from the stage.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the entity metadata. When opening an
//! existing database, we check the version and fail if it doesn't match.
//!
//! # Entity File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE                                               │
//! │   Key: &str                                                  │
//! │   Value: &[u8] (bincode)                                     │
//! │   Entries: "entity_metadata" -> EntityMetadata               │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ RECORDS_TABLE                                                │
//! │   Key: u64 (TupleId)                                         │
//! │   Value: &[u8] (bincode-serialized Vec<Option<Value>>)       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ INDEX_CATALOG_TABLE                                          │
//! │   Key: &str (index name)                                     │
//! │   Value: &[u8] (bincode-serialized IndexType)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Index Store Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ INDEX_META_TABLE                                             │
//! │   "header" -> bincode IndexHeader                            │
//! │   "config" -> packed varint config                           │
//! │   "dirty"  -> one byte (0 or 1)                              │
//! └─────────────────────────────────────────────────────────────┘
//!
//! lsh_stage_<n>  : u32 bucket -> raw LE u64 tuple ids   (SuperBit-LSH)
//! hash_entries   : bincode(value) =>> u64 tuple id      (hash index)
//! ```

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::types::{Timestamp, TupleId};
use crate::value::ColumnDef;

/// Current schema version.
///
/// Increment this when making breaking changes to the schema.
/// The database will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Entity Tables
// ============================================================================

/// Metadata table for entity-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Key of [`EntityMetadata`] in [`METADATA_TABLE`].
pub const ENTITY_METADATA_KEY: &str = "entity_metadata";

/// Records table.
///
/// Key: TupleId
/// Value: bincode-serialized positional values
pub const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Index catalogue: every index the entity owns.
///
/// Key: index name
/// Value: bincode-serialized IndexType
pub const INDEX_CATALOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("indexes");

// ============================================================================
// Index Store Tables
// ============================================================================

/// Metadata table of an index store.
pub const INDEX_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("index_metadata");

/// Key of the bincode [`IndexHeader`](crate::index::IndexHeader).
pub const HEADER_KEY: &str = "header";

/// Key of the packed type-specific config.
pub const CONFIG_KEY: &str = "config";

/// Key of the dirty flag.
pub const DIRTY_KEY: &str = "dirty";

/// Hash index entries.
///
/// Key: bincode-serialized lookup value
/// Values: TupleIds stored under that value
pub const HASH_ENTRIES_TABLE: MultimapTableDefinition<&[u8], u64> =
    MultimapTableDefinition::new("hash_entries");

/// Name of the bucket table for one LSH stage.
pub fn lsh_stage_table_name(stage: usize) -> String {
    format!("lsh_stage_{}", stage)
}

// ============================================================================
// Entity Metadata
// ============================================================================

/// Entity metadata stored in the metadata table.
///
/// This is serialized with bincode and stored under [`ENTITY_METADATA_KEY`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Column definitions.
    ///
    /// Once set, these cannot be changed without recreating the database.
    pub columns: Vec<ColumnDef>,

    /// Next tuple id to hand out. Never decreases.
    pub next_tuple_id: TupleId,

    /// Timestamp when the entity was created.
    pub created_at: Timestamp,

    /// Last time the entity was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl EntityMetadata {
    /// Creates new metadata for a fresh entity.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            columns,
            next_tuple_id: TupleId::FIRST,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Checks if this metadata is compatible with the current schema.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }

    /// Hands out the next tuple id.
    pub fn allocate_tuple_id(&mut self) -> TupleId {
        let id = self.next_tuple_id;
        self.next_tuple_id = id.next();
        id
    }
}
