//! Per-index redb store.
//!
//! Each index owns one redb file holding its header, its packed config, its
//! dirty flag and its type-specific tables (see [`crate::storage::schema`]).

use std::path::{Path, PathBuf};

use redb::{Database, Durability, ReadTransaction, ReadableTable, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{LifecycleError, Result, StorageError};
use crate::storage::schema::{CONFIG_KEY, DIRTY_KEY, HEADER_KEY, INDEX_META_TABLE};
use crate::storage::RedbEntityStore;

use super::IndexHeader;

/// The redb file backing one index.
pub struct IndexStore {
    db: Database,
    path: PathBuf,
    durability: Durability,
}

impl IndexStore {
    /// Initializes a new store.
    ///
    /// Writes the header, the optional packed config and `dirty = true`, then
    /// runs `init` in the same transaction so type-specific tables exist from
    /// the start. Fails with [`LifecycleError::IndexExists`] if `path` exists.
    #[instrument(skip(header, config_bytes, config, init), fields(path = %path.display()))]
    pub fn create(
        path: &Path,
        header: &IndexHeader,
        config_bytes: Option<&[u8]>,
        config: &Config,
        init: impl FnOnce(&WriteTransaction) -> Result<()>,
    ) -> Result<Self> {
        if path.exists() {
            return Err(LifecycleError::IndexExists(path.display().to_string()).into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = RedbEntityStore::create_database(path, config)?;
        let store = Self {
            db,
            path: path.to_path_buf(),
            durability: config.sync_mode.durability(),
        };

        let txn = store.begin_write()?;
        {
            let mut table = txn.open_table(INDEX_META_TABLE)?;
            let header_bytes = bincode::serialize(header)?;
            table.insert(HEADER_KEY, header_bytes.as_slice())?;
            if let Some(bytes) = config_bytes {
                table.insert(CONFIG_KEY, bytes)?;
            }
            table.insert(DIRTY_KEY, [1u8].as_slice())?;
        }
        init(&txn)?;
        txn.commit().map_err(StorageError::from)?;

        info!(index = %header.name, index_type = %header.index_type, "Index store initialized");
        Ok(store)
    }

    /// Opens an existing store.
    #[instrument(skip(config), fields(path = %path.display()))]
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::DatabaseNotFound(path.to_path_buf()).into());
        }
        let db = RedbEntityStore::create_database(path, config)?;
        debug!("Index store opened");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            durability: config.sync_mode.durability(),
        })
    }

    /// Location of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a write transaction with the configured durability.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().map_err(StorageError::from)?;
        txn.set_durability(self.durability);
        Ok(txn)
    }

    /// Starts a read transaction.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(self.db.begin_read().map_err(StorageError::from)?)
    }

    /// Reads the header. A missing header means the file is not an index.
    pub fn read_header(&self) -> Result<IndexHeader> {
        let txn = self.begin_read()?;
        let table = txn.open_table(INDEX_META_TABLE).map_err(|e| {
            StorageError::corrupted(format!("Cannot open index metadata table: {}", e))
        })?;
        let entry = table
            .get(HEADER_KEY)?
            .ok_or_else(|| StorageError::corrupted("Missing index header"))?;
        bincode::deserialize(entry.value())
            .map_err(|e| StorageError::corrupted(format!("Invalid index header: {}", e)).into())
    }

    /// Reads the packed config, if one was written.
    pub fn read_config(&self) -> Result<Option<Vec<u8>>> {
        let txn = self.begin_read()?;
        let table = txn.open_table(INDEX_META_TABLE)?;
        let config = table.get(CONFIG_KEY)?.map(|entry| entry.value().to_vec());
        Ok(config)
    }

    /// Reads the dirty flag. A missing flag reads as dirty.
    pub fn read_dirty(&self) -> Result<bool> {
        let txn = self.begin_read()?;
        let table = txn.open_table(INDEX_META_TABLE)?;
        let dirty = match table.get(DIRTY_KEY)? {
            Some(entry) => entry.value().first().map_or(true, |b| *b != 0),
            None => {
                warn!(path = %self.path.display(), "Index store has no dirty flag; assuming dirty");
                true
            }
        };
        Ok(dirty)
    }

    /// Persists the dirty flag in an open write transaction.
    pub fn write_dirty(txn: &WriteTransaction, dirty: bool) -> Result<()> {
        let mut table = txn.open_table(INDEX_META_TABLE)?;
        table.insert(DIRTY_KEY, [u8::from(dirty)].as_slice())?;
        Ok(())
    }

    /// Persists the dirty flag in its own transaction.
    pub fn persist_dirty(&self, dirty: bool) -> Result<()> {
        let txn = self.begin_write()?;
        Self::write_dirty(&txn, dirty)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }
}
