//! VectraDB main struct and lifecycle operations.
//!
//! The [`VectraDB`] struct is the primary interface for interacting with
//! the database. It provides methods for:
//!
//! - Opening and closing the database
//! - Inserting, updating and deleting records
//! - Creating, rebuilding and dropping secondary indexes
//! - Exact nearest-neighbor search
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vectradb::{ColumnDef, ColumnType, Config, Distance, IndexType, KnnPredicate, VectraDB};
//!
//! let columns = vec![ColumnDef::new("feature", ColumnType::FloatVector(3))];
//! let db = VectraDB::open("./vectra", &columns, Config::default())?;
//!
//! db.insert(vec![Some(vec![1.0, 0.0, 0.0].into())])?;
//!
//! let results = db.knn(&KnnPredicate::new(
//!     "feature",
//!     10,
//!     vec![1.0, 0.1, 0.0].into(),
//!     Distance::L2,
//! ))?;
//!
//! db.close()?;
//! ```
//!
//! # On-disk Layout
//!
//! ```text
//! <dir>/entity.redb          records, metadata, index catalogue
//! <dir>/indexes/<name>.idx   one store per index
//! ```
//!
//! # Thread Safety
//!
//! `VectraDB` is `Send + Sync` and can be shared across threads using `Arc`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{LifecycleError, NotFoundError, Result, VectraError};
use crate::index::{
    open_index, validate_index_name, DataChangeEvent, Index, IndexParams, IndexType,
};
use crate::knn::{CancellationFlag, Candidate, ExactScanExecutor, KnnPredicate};
use crate::storage::{EntitySource, RedbEntityStore};
use crate::types::TupleId;
use crate::value::{ColumnDef, Record, Value};

/// File name of the entity store inside the database directory.
pub const ENTITY_FILE: &str = "entity.redb";

/// Directory holding index stores.
pub const INDEX_DIR: &str = "indexes";

/// File extension of index stores.
pub const INDEX_EXTENSION: &str = "idx";

/// The main VectraDB database handle.
///
/// Create an instance with [`VectraDB::open()`] and close it with
/// [`VectraDB::close()`].
pub struct VectraDB {
    entity: Arc<RedbEntityStore>,
    indexes: RwLock<BTreeMap<String, Arc<dyn Index>>>,
    config: Config,
    dir: PathBuf,
}

impl std::fmt::Debug for VectraDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectraDB")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("indexes", &self.index_names())
            .finish_non_exhaustive()
    }
}

impl VectraDB {
    /// Opens or creates a database in directory `dir`.
    ///
    /// Every index in the catalogue is reopened.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - `columns` differ from the stored ones (`ValidationError::SchemaMismatch`)
    /// - A store is corrupted, locked, or of another schema version
    #[instrument(skip(columns, config), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, columns: &[ColumnDef], config: Config) -> Result<Self> {
        config.validate().map_err(VectraError::from)?;

        info!("Opening VectraDB");

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join(INDEX_DIR))?;

        let entity = Arc::new(RedbEntityStore::open(dir.join(ENTITY_FILE), columns, &config)?);

        let mut indexes: BTreeMap<String, Arc<dyn Index>> = BTreeMap::new();
        for (name, index_type) in entity.index_catalog()? {
            let source: Arc<dyn EntitySource> = entity.clone();
            let index = index_type.open(index_path(&dir, &name), source, &config)?;
            debug!(index = %name, index_type = %index_type, dirty = index.is_dirty(), "Index reopened");
            indexes.insert(name, Arc::from(index));
        }

        info!(
            indexes = indexes.len(),
            parallelism = config.parallelism,
            sync_mode = ?config.sync_mode,
            "VectraDB opened successfully"
        );

        Ok(Self {
            entity,
            indexes: RwLock::new(indexes),
            config,
            dir,
        })
    }

    /// Closes every index, then the entity store.
    ///
    /// Fails with `LifecycleError::LockTimeout` if an index transaction
    /// outlives the close timeout. The other indexes are closed regardless.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn close(self) -> Result<()> {
        info!("Closing VectraDB");

        // Every index gets its close attempt; the first failure is returned.
        let indexes = std::mem::take(&mut *self.indexes.write());
        let mut first_error = None;
        for (name, index) in &indexes {
            if let Err(e) = index.close() {
                warn!(index = %name, error = %e, "Failed to close index");
                first_error.get_or_insert(e);
            }
        }
        drop(indexes);

        match Arc::try_unwrap(self.entity) {
            Ok(entity) => {
                if let Err(e) = entity.close() {
                    first_error.get_or_insert(e);
                }
            }
            Err(_) => warn!("Entity store still referenced; released on last drop"),
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("VectraDB closed successfully");
                Ok(())
            }
        }
    }

    /// Returns a reference to the database configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Column definitions of the entity.
    pub fn columns(&self) -> &[ColumnDef] {
        self.entity.columns()
    }

    /// The underlying entity store.
    pub fn entity(&self) -> &RedbEntityStore {
        &self.entity
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Inserts one record and propagates it to every index.
    pub fn insert(&self, values: Vec<Option<Value>>) -> Result<TupleId> {
        let record = self.entity.insert(values)?;
        let id = record.tuple_id;
        self.propagate(&DataChangeEvent::Insert { new: record });
        Ok(id)
    }

    /// Inserts many records in one entity transaction.
    ///
    /// Indexes are marked dirty instead of being updated record by record;
    /// rebuild them with [`rebuild_index`](Self::rebuild_index).
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub fn insert_batch(&self, rows: Vec<Vec<Option<Value>>>) -> Result<Vec<TupleId>> {
        let ids = self.entity.insert_batch(rows)?;
        if !ids.is_empty() {
            for (name, index) in self.indexes.read().iter() {
                if let Err(e) = mark_dirty(index.as_ref()) {
                    warn!(index = %name, error = %e, "Failed to mark index dirty after batch insert");
                }
            }
        }
        Ok(ids)
    }

    /// Replaces the values of record `id`.
    pub fn update(&self, id: TupleId, values: Vec<Option<Value>>) -> Result<()> {
        let (old, new) = self.entity.update(id, values)?;
        self.propagate(&DataChangeEvent::Update { old, new });
        Ok(())
    }

    /// Deletes record `id` and returns it.
    pub fn delete(&self, id: TupleId) -> Result<Record> {
        let old = self.entity.delete(id)?;
        self.propagate(&DataChangeEvent::Delete { old: old.clone() });
        Ok(old)
    }

    /// Reads record `id`.
    pub fn get(&self, id: TupleId) -> Result<Option<Record>> {
        self.entity.read(id)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        self.entity.count()
    }

    /// Routes one change to every index.
    ///
    /// Incremental indexes are updated, the others marked dirty. A failing
    /// index is marked dirty; the entity change stays committed.
    fn propagate(&self, event: &DataChangeEvent) {
        for (name, index) in self.indexes.read().iter() {
            // Marked even when already dirty; a running rebuild must not
            // commit clean over this change.
            let result = if index.supports_incremental_update() {
                apply_update(index.as_ref(), event)
            } else {
                mark_dirty(index.as_ref())
            };

            if let Err(e) = result {
                warn!(
                    index = %name,
                    tuple_id = %event.tuple_id(),
                    error = %e,
                    "Index maintenance failed, marking index dirty"
                );
                if let Err(e) = mark_dirty(index.as_ref()) {
                    warn!(index = %name, error = %e, "Failed to mark index dirty");
                }
            }
        }
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Creates an index over `columns` and builds it.
    ///
    /// While the build runs, [`index`](Self::index) already returns the new
    /// index, reporting it dirty.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::IndexExists` if the name is taken
    /// - `ValidationError` for bad names, unknown columns or bad `params`
    /// - Any error of the initial rebuild; the index is removed again
    #[instrument(skip(self, columns, params), fields(index = %name, index_type = %index_type))]
    pub fn create_index(
        &self,
        name: &str,
        index_type: IndexType,
        columns: &[&str],
        params: &IndexParams,
    ) -> Result<()> {
        validate_index_name(name)?;
        let definitions = columns
            .iter()
            .map(|c| {
                let position = self.entity.column_position(c)?;
                Ok(self.entity.columns()[position].clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let path = index_path(&self.dir, name);
        let index: Arc<dyn Index> = {
            let mut indexes = self.indexes.write();
            if indexes.contains_key(name) {
                return Err(LifecycleError::IndexExists(name.to_string()).into());
            }
            let source: Arc<dyn EntitySource> = self.entity.clone();
            let index: Arc<dyn Index> =
                Arc::from(index_type.create(&path, name, definitions, params, source, &self.config)?);
            indexes.insert(name.to_string(), index.clone());
            index
        };

        // Built outside the map lock. The index is published dirty, so record
        // changes racing the build mark it dirty behind the rebuild.
        let built = rebuild(index.as_ref()).and_then(|()| self.entity.register_index(name, index_type));
        if let Err(e) = built {
            warn!(error = %e, "Initial build failed, removing index");
            self.indexes.write().remove(name);
            index.close()?;
            drop(index);
            std::fs::remove_file(&path)?;
            return Err(e);
        }

        info!("Index created");
        Ok(())
    }

    /// Closes an index, removes it from the catalogue and deletes its store.
    #[instrument(skip(self))]
    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        let index = indexes
            .get(name)
            .cloned()
            .ok_or_else(|| NotFoundError::index(name))?;

        index.close()?;
        indexes.remove(name);
        self.entity.unregister_index(name)?;
        let path = index.path().to_path_buf();
        drop(index);
        std::fs::remove_file(&path)?;

        info!("Index dropped");
        Ok(())
    }

    /// Returns the index called `name`.
    pub fn index(&self, name: &str) -> Result<Arc<dyn Index>> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NotFoundError::index(name).into())
    }

    /// Names of all indexes, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Rebuilds index `name` from a full entity scan.
    #[instrument(skip(self))]
    pub fn rebuild_index(&self, name: &str) -> Result<()> {
        let index = self.index(name)?;
        rebuild(index.as_ref())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Answers `predicate` exactly by scanning every record.
    ///
    /// Runs on `Config::parallelism` threads when that is above 1.
    pub fn knn(&self, predicate: &KnnPredicate) -> Result<Vec<Vec<Candidate>>> {
        self.knn_with_cancellation(predicate, &CancellationFlag::new())
    }

    /// Like [`knn`](Self::knn), but aborts with [`VectraError::Cancelled`]
    /// once `cancel` is set.
    pub fn knn_with_cancellation(
        &self,
        predicate: &KnnPredicate,
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<Candidate>>> {
        ExactScanExecutor::new(self.entity.as_ref())
            .with_parallelism(self.config.parallelism)
            .execute_with_cancellation(predicate, cancel)
    }
}

/// Location of the store of index `name`.
fn index_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(INDEX_DIR).join(format!("{}.{}", name, INDEX_EXTENSION))
}

/// Reopens a single index store outside of a database handle.
pub fn open_index_at(
    dir: impl AsRef<Path>,
    name: &str,
    entity: Arc<dyn EntitySource>,
    config: &Config,
) -> Result<Box<dyn Index>> {
    validate_index_name(name)?;
    open_index(index_path(dir.as_ref(), name), entity, config)
}

fn rebuild(index: &dyn Index) -> Result<()> {
    let mut tx = index.begin()?;
    tx.rebuild()?;
    tx.commit()
}

fn apply_update(index: &dyn Index, event: &DataChangeEvent) -> Result<()> {
    let mut tx = index.begin()?;
    tx.update(event)?;
    tx.commit()
}

fn mark_dirty(index: &dyn Index) -> Result<()> {
    let mut tx = index.begin()?;
    tx.mark_dirty()?;
    tx.commit()
}

// VectraDB is auto Send + Sync: Arc<RedbEntityStore>, the RwLock-guarded
// map of Arc<dyn Index> (Index: Send + Sync) and Config are all Send + Sync.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Distance;
    use crate::error::ValidationError;
    use crate::index::{Predicate, SuperBitLshConfig};
    use crate::value::ColumnType;
    use tempfile::tempdir;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("label", ColumnType::String),
            ColumnDef::new("feature", ColumnType::FloatVector(2)),
        ]
    }

    fn row(label: &str, x: f32, y: f32) -> Vec<Option<Value>> {
        vec![Some(label.into()), Some(vec![x, y].into())]
    }

    fn lsh_params() -> IndexParams {
        SuperBitLshConfig::new(4, 2, 42).to_params()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        assert!(dir.path().join(ENTITY_FILE).exists());
        assert!(dir.path().join(INDEX_DIR).is_dir());
        assert!(db.index_names().is_empty());
        db.close().unwrap();
    }

    #[test]
    fn test_config_validation() {
        let dir = tempdir().unwrap();
        let invalid_config = Config {
            cache_size_mb: 0,
            ..Default::default()
        };
        assert!(VectraDB::open(dir.path(), &columns(), invalid_config).is_err());
    }

    #[test]
    fn test_schema_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        VectraDB::open(dir.path(), &columns(), Config::default())
            .unwrap()
            .close()
            .unwrap();

        let other = vec![ColumnDef::new("feature", ColumnType::FloatVector(3))];
        let err = VectraDB::open(dir.path(), &other, Config::default()).unwrap_err();
        assert!(matches!(
            err,
            VectraError::Validation(ValidationError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_record_crud() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();

        let id = db.insert(row("a", 1.0, 0.0)).unwrap();
        assert_eq!(db.count().unwrap(), 1);
        db.update(id, row("b", 0.0, 1.0)).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().value(0), Some(&Value::from("b")));

        let deleted = db.delete(id).unwrap();
        assert_eq!(deleted.tuple_id, id);
        assert!(db.get(id).unwrap().is_none());
        assert!(db.delete(id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_changes_mark_lsh_dirty_and_update_hash() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        db.insert(row("a", 1.0, 0.0)).unwrap();

        db.create_index("lsh", IndexType::SuperBitLsh, &["feature"], &lsh_params())
            .unwrap();
        db.create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap();
        assert!(!db.index("lsh").unwrap().is_dirty());

        let id = db.insert(row("b", 0.0, 1.0)).unwrap();
        assert!(db.index("lsh").unwrap().is_dirty());

        let labels = db.index("labels").unwrap();
        assert!(!labels.is_dirty());
        let tx = labels.begin().unwrap();
        let found: Vec<_> = tx
            .filter(&Predicate::equals("label", vec!["b".into()]))
            .unwrap()
            .map(|m| m.unwrap().tuple_id)
            .collect();
        assert_eq!(found, vec![id]);
        drop(tx);

        db.rebuild_index("lsh").unwrap();
        assert!(!db.index("lsh").unwrap().is_dirty());
        db.close().unwrap();
    }

    #[test]
    fn test_insert_batch_marks_all_dirty() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        db.create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap();

        db.insert_batch(vec![row("a", 1.0, 0.0), row("b", 0.0, 1.0)])
            .unwrap();
        assert!(db.index("labels").unwrap().is_dirty());
    }

    #[test]
    fn test_create_index_errors() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();

        db.create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap();
        let err = db
            .create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap_err();
        assert!(err.is_lifecycle());

        let err = db
            .create_index("x", IndexType::Hash, &["missing"], &IndexParams::new())
            .unwrap_err();
        assert!(err.is_validation());

        let err = db
            .create_index("lsh", IndexType::SuperBitLsh, &["feature"], &IndexParams::new())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!index_path(dir.path(), "lsh").exists());
        assert_eq!(db.index_names(), vec!["labels".to_string()]);
    }

    #[test]
    fn test_drop_index() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        db.create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap();
        let path = index_path(dir.path(), "labels");
        assert!(path.exists());

        db.drop_index("labels").unwrap();
        assert!(!path.exists());
        assert!(db.index("labels").err().unwrap().is_not_found());
        assert!(db.drop_index("labels").unwrap_err().is_not_found());

        db.close().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        assert!(db.index_names().is_empty());
    }

    #[test]
    fn test_knn_parallel_and_sequential_agree() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::with_parallelism(4)).unwrap();
        for i in 0..50 {
            db.insert(row("x", i as f32, (i % 7) as f32)).unwrap();
        }
        let p = KnnPredicate::new("feature", 5, vec![10.0, 3.0].into(), Distance::L2);
        let parallel = db.knn(&p).unwrap();
        let sequential = ExactScanExecutor::new(db.entity()).execute(&p).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_open_index_at() {
        let dir = tempdir().unwrap();
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        db.create_index("labels", IndexType::Hash, &["label"], &IndexParams::new())
            .unwrap();
        db.drop_index("labels").unwrap();

        let source: Arc<dyn EntitySource> = Arc::new(
            RedbEntityStore::open(dir.path().join("other.redb"), &columns(), &Config::default())
                .unwrap(),
        );
        let err = open_index_at(dir.path(), "labels", source.clone(), &Config::default())
            .err()
            .unwrap();
        assert!(err.is_storage());
        let err = open_index_at(dir.path(), "../labels", source, &Config::default())
            .err()
            .unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_vectradb_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VectraDB>();
    }
}
