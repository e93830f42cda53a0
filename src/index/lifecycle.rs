//! Index lifecycle: open/closed state, locking and transaction plumbing
//! shared by every index type.
//!
//! Two locks guard an index:
//!
//! - The **close lock**. Every transaction holds it shared for its whole
//!   lifetime; [`IndexCore::close`] takes it exclusively with a timeout.
//! - The **content lock**. Writers (`rebuild`, `update`, `mark_dirty`) take
//!   it exclusively until commit or rollback. A filter takes it shared only
//!   while opening its redb read snapshot, so a filter issued during a
//!   rebuild waits for the rebuild to finish, and a live result sequence
//!   never blocks a writer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use redb::{ReadTransaction, TableError, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{LifecycleError, Result, StorageError};
use crate::types::TransactionId;

use super::store::IndexStore;
use super::IndexHeader;

// ============================================================================
// IndexCore
// ============================================================================

/// State every index type embeds.
pub(crate) struct IndexCore {
    header: IndexHeader,
    path: PathBuf,
    /// Taken (and the file released) on close.
    store: Mutex<Option<Arc<IndexStore>>>,
    close_lock: RwLock<()>,
    content_lock: RwLock<()>,
    closed: AtomicBool,
    /// Last committed value of the persisted dirty flag.
    dirty: AtomicBool,
    close_timeout: Duration,
}

impl IndexCore {
    pub(crate) fn new(store: IndexStore, header: IndexHeader, dirty: bool, config: &Config) -> Self {
        Self {
            header,
            path: store.path().to_path_buf(),
            store: Mutex::new(Some(Arc::new(store))),
            close_lock: RwLock::new(()),
            content_lock: RwLock::new(()),
            closed: AtomicBool::new(false),
            dirty: AtomicBool::new(dirty),
            close_timeout: config.close_timeout,
        }
    }

    pub(crate) fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub(crate) fn name(&self) -> &str {
        &self.header.name
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens a transaction. Fails with `IndexClosed` after [`close`](Self::close).
    pub(crate) fn begin(&self) -> Result<TxBase<'_>> {
        // Take the guard before checking the flag: close() flips the flag
        // while holding the lock exclusively.
        let close_guard = self.close_lock.read();
        if self.is_closed() {
            return Err(LifecycleError::IndexClosed(self.header.name.clone()).into());
        }
        let store = self
            .store
            .lock()
            .clone()
            .ok_or_else(|| LifecycleError::IndexClosed(self.header.name.clone()))?;

        let id = TransactionId::new();
        debug!(index = %self.header.name, tx = %id, "Index transaction started");
        Ok(TxBase {
            write_txn: None,
            content_guard: None,
            pending_dirty: None,
            store,
            _close_guard: close_guard,
            core: self,
            id,
        })
    }

    /// Closes the index and releases its file.
    ///
    /// Waits up to the configured close timeout for live transactions.
    /// Closing twice is a no-op.
    #[instrument(skip(self), fields(index = %self.header.name))]
    pub(crate) fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let Some(_guard) = self.close_lock.try_write_for(self.close_timeout) else {
            warn!(timeout = ?self.close_timeout, "Timed out waiting for index transactions");
            return Err(LifecycleError::LockTimeout {
                index: self.header.name.clone(),
                timeout: self.close_timeout,
            }
            .into());
        };

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        drop(self.store.lock().take());

        info!("Index closed");
        Ok(())
    }
}

// ============================================================================
// TxBase
// ============================================================================

/// Shared part of every index transaction.
///
/// The redb write transaction is created on first write, together with the
/// exclusive content guard. Dropping a `TxBase` without committing aborts the
/// write transaction. Field order is drop order.
pub(crate) struct TxBase<'a> {
    write_txn: Option<WriteTransaction>,
    content_guard: Option<RwLockWriteGuard<'a, ()>>,
    pending_dirty: Option<bool>,
    store: Arc<IndexStore>,
    _close_guard: RwLockReadGuard<'a, ()>,
    core: &'a IndexCore,
    id: TransactionId,
}

impl<'a> TxBase<'a> {
    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn core(&self) -> &'a IndexCore {
        self.core
    }

    /// Dirty state as seen by this transaction, including its own writes.
    pub(crate) fn is_dirty(&self) -> bool {
        self.pending_dirty.unwrap_or_else(|| self.core.is_dirty())
    }

    /// Returns the write transaction, taking the content lock on first use.
    pub(crate) fn write(&mut self) -> Result<&WriteTransaction> {
        if self.content_guard.is_none() {
            self.content_guard = Some(self.core.content_lock.write());
        }
        let txn = match self.write_txn.take() {
            Some(txn) => txn,
            None => self.store.begin_write()?,
        };
        Ok(&*self.write_txn.insert(txn))
    }

    /// Writes the dirty flag; visible to others after commit.
    pub(crate) fn set_dirty(&mut self, dirty: bool) -> Result<()> {
        let txn = self.write()?;
        IndexStore::write_dirty(txn, dirty)?;
        self.pending_dirty = Some(dirty);
        Ok(())
    }

    /// Returns a consistent view of the index content.
    ///
    /// A transaction that has written sees its own pending writes; any other
    /// transaction reads the last committed state. The shared content lock is
    /// held only while the read transaction is opened: that waits for a
    /// running writer, and the read transaction then pins what it committed.
    pub(crate) fn snapshot(&self) -> Result<Snapshot<'_>> {
        if self.content_guard.is_some() {
            if let Some(txn) = &self.write_txn {
                return Ok(Snapshot {
                    source: SnapshotSource::Pending(txn),
                    dirty: self.is_dirty(),
                });
            }
        }
        let _guard = self.core.content_lock.read();
        Ok(Snapshot {
            source: SnapshotSource::Committed(self.store.begin_read()?),
            dirty: self.is_dirty(),
        })
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        if let Some(txn) = self.write_txn.take() {
            txn.commit().map_err(StorageError::from)?;
            if let Some(dirty) = self.pending_dirty {
                self.core.dirty.store(dirty, Ordering::SeqCst);
            }
            debug!(index = %self.core.name(), tx = %self.id, "Index transaction committed");
        }
        Ok(())
    }

    pub(crate) fn rollback(mut self) -> Result<()> {
        if let Some(txn) = self.write_txn.take() {
            txn.abort().map_err(StorageError::from)?;
            debug!(index = %self.core.name(), tx = %self.id, "Index transaction rolled back");
        }
        Ok(())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// A read view held by a filter's result sequence.
pub(crate) struct Snapshot<'t> {
    pub(crate) source: SnapshotSource<'t>,
    /// Dirty flag as of `source`.
    pub(crate) dirty: bool,
}

pub(crate) enum SnapshotSource<'t> {
    /// Last committed state.
    Committed(ReadTransaction),
    /// The transaction's own uncommitted writes.
    Pending(&'t WriteTransaction),
}

/// Maps a missing table to `None`; it reads as empty.
pub(crate) fn optional_table<T>(opened: std::result::Result<T, TableError>) -> Result<Option<T>> {
    match opened {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::storage::schema::{DIRTY_KEY, INDEX_META_TABLE};
    use crate::value::{ColumnDef, ColumnType};
    use redb::ReadableTable;
    use tempfile::{tempdir, TempDir};

    fn core(close_timeout: Duration) -> (TempDir, IndexCore) {
        let dir = tempdir().unwrap();
        let header = IndexHeader::new(
            "idx",
            IndexType::Hash,
            vec![ColumnDef::new("id", ColumnType::Long)],
        );
        let config = Config {
            close_timeout,
            ..Config::default()
        };
        let store =
            IndexStore::create(&dir.path().join("idx.idx"), &header, None, &config, |_| Ok(()))
                .unwrap();
        (dir, IndexCore::new(store, header, true, &config))
    }

    #[test]
    fn test_begin_after_close_fails() {
        let (_dir, core) = core(Duration::from_millis(100));
        core.close().unwrap();
        assert!(core.is_closed());
        let err = core.begin().err().unwrap();
        assert!(matches!(
            err,
            crate::VectraError::Lifecycle(LifecycleError::IndexClosed(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, core) = core(Duration::from_millis(100));
        core.close().unwrap();
        core.close().unwrap();
    }

    #[test]
    fn test_close_times_out_with_live_transaction() {
        let (_dir, core) = core(Duration::from_millis(50));
        let tx = core.begin().unwrap();
        let err = core.close().unwrap_err();
        assert!(matches!(
            err,
            crate::VectraError::Lifecycle(LifecycleError::LockTimeout { .. })
        ));
        assert!(!core.is_closed());

        drop(tx);
        core.close().unwrap();
    }

    #[test]
    fn test_dirty_visible_after_commit_only() {
        let (_dir, core) = core(Duration::from_millis(100));
        assert!(core.is_dirty());

        let mut tx = core.begin().unwrap();
        tx.set_dirty(false).unwrap();
        assert!(!tx.is_dirty());
        assert!(core.is_dirty());
        tx.commit().unwrap();
        assert!(!core.is_dirty());

        let mut tx = core.begin().unwrap();
        tx.set_dirty(true).unwrap();
        tx.rollback().unwrap();
        assert!(!core.is_dirty());
    }

    #[test]
    fn test_snapshot_sees_own_writes() {
        let (_dir, core) = core(Duration::from_millis(100));
        let mut tx = core.begin().unwrap();
        tx.write().unwrap();
        let snapshot = tx.snapshot().unwrap();
        assert!(matches!(snapshot.source, SnapshotSource::Pending(_)));
    }

    #[test]
    fn test_read_only_transaction_commit_is_noop() {
        let (_dir, core) = core(Duration::from_millis(100));
        let tx = core.begin().unwrap();
        {
            let snapshot = tx.snapshot().unwrap();
            assert!(matches!(snapshot.source, SnapshotSource::Committed(_)));
        }
        tx.commit().unwrap();
        assert!(core.is_dirty());
    }

    #[test]
    fn test_open_snapshot_does_not_block_writer() {
        let (_dir, core) = core(Duration::from_millis(100));
        let reader = core.begin().unwrap();
        let snapshot = reader.snapshot().unwrap();
        assert!(snapshot.dirty);

        let mut writer = core.begin().unwrap();
        writer.set_dirty(false).unwrap();
        writer.commit().unwrap();
        assert!(!core.is_dirty());

        // The reader still sees the state it opened
        let SnapshotSource::Committed(txn) = &snapshot.source else {
            panic!("expected a committed snapshot");
        };
        let meta = txn.open_table(INDEX_META_TABLE).unwrap();
        let dirty = meta.get(DIRTY_KEY).unwrap().unwrap();
        assert_eq!(dirty.value(), [1u8].as_slice());
    }
}
