//! redb entity store.
//!
//! This module provides the record storage for VectraDB using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//!
//! Every write transaction reads the entity metadata, allocates tuple ids
//! from it and writes it back together with the records, so the id sequence
//! survives reopen and is never handed out twice.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use ::redb::{Database, Durability, ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    EntityMetadata, ENTITY_METADATA_KEY, INDEX_CATALOG_TABLE, METADATA_TABLE, RECORDS_TABLE,
    SCHEMA_VERSION,
};
use super::{EntitySource, RecordVisitor};
use crate::config::Config;
use crate::error::{NotFoundError, Result, StorageError, ValidationError, VectraError};
use crate::index::IndexType;
use crate::types::{Timestamp, TupleId};
use crate::value::{validate_columns, validate_row, ColumnDef, Record, Value};

/// redb-backed record storage for one entity.
///
/// # Thread Safety
///
/// `RedbEntityStore` is `Send + Sync`. redb handles internal synchronization
/// using MVCC for readers and exclusive locking for writers.
#[derive(Debug)]
pub struct RedbEntityStore {
    /// The redb database handle.
    db: Database,

    /// Column definitions (immutable after creation).
    columns: Vec<ColumnDef>,

    /// When the entity was created.
    created_at: Timestamp,

    /// Durability applied to every write transaction.
    durability: Durability,

    /// Path to the database file.
    path: PathBuf,
}

impl RedbEntityStore {
    /// Opens or creates an entity store at the given path.
    ///
    /// If the file doesn't exist, it is created and initialized with
    /// `columns`. If it exists, the stored column definitions must equal
    /// `columns`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database file is corrupted
    /// - The database is locked by another process
    /// - Schema version doesn't match
    /// - The stored columns differ from `columns`
    #[instrument(skip(columns, config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, columns: &[ColumnDef], config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "Opening entity store");

        validate_columns(columns)?;
        let db = Self::create_database(path, config)?;
        let durability = config.sync_mode.durability();

        if db_exists {
            Self::open_existing(db, path.to_path_buf(), columns, durability)
        } else {
            Self::initialize_new(db, path.to_path_buf(), columns, durability)
        }
    }

    /// Creates the redb database with appropriate settings.
    pub(crate) fn create_database(path: &Path, config: &Config) -> Result<Database> {
        let mut builder = Database::builder();
        builder.set_cache_size(config.cache_size_bytes());

        // redb doesn't expose a typed error variant for lock conflicts,
        // so they are detected via the error message.
        let db = builder.create(path).map_err(|e| {
            if e.to_string().contains("locked") {
                StorageError::DatabaseLocked
            } else {
                StorageError::Redb(e.to_string())
            }
        })?;

        debug!("Database file opened successfully");
        Ok(db)
    }

    /// Initializes a new entity with tables and metadata.
    #[instrument(skip(db, columns, durability), fields(path = %path.display()))]
    fn initialize_new(
        db: Database,
        path: PathBuf,
        columns: &[ColumnDef],
        durability: Durability,
    ) -> Result<Self> {
        info!("Initializing new entity");

        let metadata = EntityMetadata::new(columns.to_vec());

        let mut write_txn = db.begin_write().map_err(StorageError::from)?;
        write_txn.set_durability(durability);
        {
            write_metadata(&write_txn, &metadata)?;
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(INDEX_CATALOG_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = SCHEMA_VERSION,
            columns = columns.len(),
            "Entity initialized"
        );

        Ok(Self {
            db,
            columns: metadata.columns,
            created_at: metadata.created_at,
            durability,
            path,
        })
    }

    /// Opens and validates an existing entity.
    #[instrument(skip(db, columns, durability), fields(path = %path.display()))]
    fn open_existing(
        db: Database,
        path: PathBuf,
        columns: &[ColumnDef],
        durability: Durability,
    ) -> Result<Self> {
        info!("Opening existing entity");

        let read_txn = db.begin_read().map_err(StorageError::from)?;
        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(ENTITY_METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing entity metadata"))?;

            bincode::deserialize::<EntityMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };
        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Schema version mismatch"
            );
            return Err(VectraError::Storage(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }));
        }

        if metadata.columns != columns {
            warn!(
                stored = metadata.columns.len(),
                requested = columns.len(),
                "Column definitions mismatch"
            );
            return Err(ValidationError::SchemaMismatch(format!(
                "entity was created with columns [{}], opened with [{}]",
                describe_columns(&metadata.columns),
                describe_columns(columns)
            ))
            .into());
        }

        let mut metadata = metadata;
        metadata.touch();

        let mut write_txn = db.begin_write().map_err(StorageError::from)?;
        write_txn.set_durability(durability);
        write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = metadata.schema_version,
            next_tuple_id = %metadata.next_tuple_id,
            "Entity opened successfully"
        );

        Ok(Self {
            db,
            columns: metadata.columns,
            created_at: metadata.created_at,
            durability,
            path,
        })
    }

    /// Returns a reference to the underlying redb database.
    #[inline]
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the entity was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Reads the current metadata.
    pub fn metadata(&self) -> Result<EntityMetadata> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(METADATA_TABLE)?;
        let bytes = table
            .get(ENTITY_METADATA_KEY)?
            .ok_or_else(|| StorageError::corrupted("Missing entity metadata"))?;
        Ok(bincode::deserialize(bytes.value())?)
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut write_txn = self.db.begin_write().map_err(StorageError::from)?;
        write_txn.set_durability(self.durability);
        Ok(write_txn)
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Inserts one record and returns it with its assigned tuple id.
    pub fn insert(&self, values: Vec<Option<Value>>) -> Result<Record> {
        validate_row(&self.columns, &values)?;

        let write_txn = self.begin_write()?;
        let mut metadata = read_metadata(&write_txn)?;
        let tuple_id = metadata.allocate_tuple_id();
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let bytes = bincode::serialize(&values)?;
            table.insert(tuple_id.as_u64(), bytes.as_slice())?;
        }
        write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        debug!(tuple_id = %tuple_id, "Record inserted");
        Ok(Record::new(tuple_id, values))
    }

    /// Inserts many records in one transaction.
    ///
    /// Either every row is stored or none is.
    pub fn insert_batch(&self, rows: Vec<Vec<Option<Value>>>) -> Result<Vec<TupleId>> {
        for values in &rows {
            validate_row(&self.columns, values)?;
        }

        let write_txn = self.begin_write()?;
        let mut metadata = read_metadata(&write_txn)?;
        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            for values in &rows {
                let tuple_id = metadata.allocate_tuple_id();
                let bytes = bincode::serialize(values)?;
                table.insert(tuple_id.as_u64(), bytes.as_slice())?;
                ids.push(tuple_id);
            }
        }
        write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        debug!(count = ids.len(), "Batch inserted");
        Ok(ids)
    }

    /// Replaces the values of an existing record.
    ///
    /// Returns the previous and the new record.
    pub fn update(&self, id: TupleId, values: Vec<Option<Value>>) -> Result<(Record, Record)> {
        validate_row(&self.columns, &values)?;

        let write_txn = self.begin_write()?;
        let old = {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let bytes = bincode::serialize(&values)?;
            let previous = table.insert(id.as_u64(), bytes.as_slice())?;
            match previous {
                Some(old) => decode_record(id.as_u64(), old.value())?,
                None => return Err(NotFoundError::record(id).into()),
            }
        };
        write_txn.commit().map_err(StorageError::from)?;

        debug!(tuple_id = %id, "Record updated");
        Ok((old, Record::new(id, values)))
    }

    /// Deletes a record and returns it.
    pub fn delete(&self, id: TupleId) -> Result<Record> {
        let write_txn = self.begin_write()?;
        let old = {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let removed = table.remove(id.as_u64())?;
            match removed {
                Some(old) => decode_record(id.as_u64(), old.value())?,
                None => return Err(NotFoundError::record(id).into()),
            }
        };
        write_txn.commit().map_err(StorageError::from)?;

        debug!(tuple_id = %id, "Record deleted");
        Ok(old)
    }

    // =========================================================================
    // Index Catalogue
    // =========================================================================

    /// Records an index in the catalogue.
    pub fn register_index(&self, name: &str, index_type: IndexType) -> Result<()> {
        let bytes = bincode::serialize(&index_type)?;
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(INDEX_CATALOG_TABLE)?;
            table.insert(name, bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        debug!(index = name, index_type = ?index_type, "Index registered");
        Ok(())
    }

    /// Removes an index from the catalogue. Returns whether it was listed.
    pub fn unregister_index(&self, name: &str) -> Result<bool> {
        let write_txn = self.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(INDEX_CATALOG_TABLE)?;
            let removed = table.remove(name)?;
            removed.is_some()
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(existed)
    }

    /// Lists the catalogue in name order.
    pub fn index_catalog(&self) -> Result<Vec<(String, IndexType)>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(INDEX_CATALOG_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (name, value) = result?;
            let index_type: IndexType = bincode::deserialize(value.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid catalog entry: {}", e)))?;
            entries.push((name.value().to_string(), index_type));
        }
        Ok(entries)
    }

    /// Closes the store. redb flushes on drop, so this cannot fail today.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn close(self) -> Result<()> {
        info!("Closing entity store");
        drop(self.db);
        Ok(())
    }
}

impl EntitySource for RedbEntityStore {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn max_tuple_id(&self) -> Result<Option<TupleId>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        let last = table.last()?;
        Ok(last.map(|(key, _)| TupleId::new(key.value())))
    }

    fn count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        Ok(table.len()?)
    }

    fn read(&self, id: TupleId) -> Result<Option<Record>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        match table.get(id.as_u64())? {
            Some(value) => Ok(Some(decode_record(id.as_u64(), value.value())?)),
            None => Ok(None),
        }
    }

    fn scan(&self, range: RangeInclusive<TupleId>, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        for entry in table.range(range.start().as_u64()..=range.end().as_u64())? {
            let (key, value) = entry?;
            visitor(decode_record(key.value(), value.value())?)?;
        }
        Ok(())
    }
}

fn read_metadata(write_txn: &WriteTransaction) -> Result<EntityMetadata> {
    let table = write_txn.open_table(METADATA_TABLE)?;
    let bytes = table
        .get(ENTITY_METADATA_KEY)?
        .ok_or_else(|| StorageError::corrupted("Missing entity metadata"))?;
    Ok(bincode::deserialize(bytes.value())?)
}

fn write_metadata(write_txn: &WriteTransaction, metadata: &EntityMetadata) -> Result<()> {
    let mut table = write_txn.open_table(METADATA_TABLE)?;
    let bytes = bincode::serialize(metadata)?;
    table.insert(ENTITY_METADATA_KEY, bytes.as_slice())?;
    Ok(())
}

fn decode_record(id: u64, bytes: &[u8]) -> Result<Record> {
    let values: Vec<Option<Value>> = bincode::deserialize(bytes)
        .map_err(|e| StorageError::corrupted(format!("Invalid record {}: {}", id, e)))?;
    Ok(Record::new(TupleId::new(id), values))
}

fn describe_columns(columns: &[ColumnDef]) -> String {
    columns
        .iter()
        .map(|c| format!("{}: {}", c.name, c.column_type))
        .collect::<Vec<_>>()
        .join(", ")
}

// RedbEntityStore is auto Send + Sync: Database, Vec<ColumnDef> and PathBuf
// are all Send + Sync.
