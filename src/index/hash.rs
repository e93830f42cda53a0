//! Non-unique hash index for equality lookups on one column.
//!
//! Entries live in a redb multimap from the bincode encoding of a value to
//! the tuple ids holding it. Unlike SuperBit-LSH this index is exact and
//! maintained incrementally.

use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

use redb::ReadableMultimapTable;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{LifecycleError, Result, ValidationError, VectraError};
use crate::storage::schema::HASH_ENTRIES_TABLE;
use crate::storage::EntitySource;
use crate::types::{TransactionId, TupleId};
use crate::value::{ColumnDef, Record, Value};

use super::lifecycle::{optional_table, IndexCore, Snapshot, SnapshotSource, TxBase};
use super::matches::LazyMatches;
use super::store::IndexStore;
use super::{
    Cost, DataChangeEvent, Index, IndexHeader, IndexTransaction, IndexType, MatchIter, Predicate,
};

/// A non-unique hash index.
pub struct NonUniqueHashIndex {
    core: IndexCore,
    /// Position of the indexed column in entity records.
    position: usize,
    entity: Arc<dyn EntitySource>,
}

impl NonUniqueHashIndex {
    #[instrument(skip(header, entity, cfg), fields(index = %header.name))]
    pub(crate) fn create(
        path: &Path,
        header: IndexHeader,
        entity: Arc<dyn EntitySource>,
        cfg: &Config,
    ) -> Result<Self> {
        let position = resolve_column(&header, entity.as_ref())?;
        let store = IndexStore::create(path, &header, None, cfg, |txn| {
            txn.open_multimap_table(HASH_ENTRIES_TABLE)?;
            Ok(())
        })?;
        info!("Hash index created");
        Ok(Self {
            core: IndexCore::new(store, header, true, cfg),
            position,
            entity,
        })
    }

    #[instrument(skip(store, header, entity, cfg), fields(index = %header.name))]
    pub(crate) fn open(
        store: IndexStore,
        header: IndexHeader,
        entity: Arc<dyn EntitySource>,
        cfg: &Config,
    ) -> Result<Self> {
        let position = resolve_column(&header, entity.as_ref())?;
        let dirty = store.read_dirty()?;
        debug!(dirty, "Hash index opened");
        Ok(Self {
            core: IndexCore::new(store, header, dirty, cfg),
            position,
            entity,
        })
    }

    fn column(&self) -> &ColumnDef {
        &self.core.header().columns[0]
    }
}

fn resolve_column(header: &IndexHeader, entity: &dyn EntitySource) -> Result<usize> {
    let [column] = header.columns.as_slice() else {
        return Err(ValidationError::invalid_field(
            "columns",
            "a hash index covers exactly one column",
        )
        .into());
    };
    if !column.column_type.is_scalar() {
        return Err(VectraError::type_mismatch(
            &column.name,
            "scalar",
            column.column_type.type_name(),
        ));
    }
    entity.column_position(&column.name)
}

fn entry_key(value: &Value) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

impl Index for NonUniqueHashIndex {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn index_type(&self) -> IndexType {
        IndexType::Hash
    }

    fn columns(&self) -> &[ColumnDef] {
        &self.core.header().columns
    }

    fn header(&self) -> &IndexHeader {
        self.core.header()
    }

    fn path(&self) -> &Path {
        self.core.path()
    }

    fn supports_incremental_update(&self) -> bool {
        true
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        matches!(predicate, Predicate::Equals { column, .. } if *column == self.column().name)
    }

    fn cost(&self, predicate: &Predicate) -> Cost {
        match predicate {
            Predicate::Equals { values, .. } if !self.is_dirty() && self.can_process(predicate) => {
                let n = values.len() as f64;
                Cost::new(n, n, 0.0)
            }
            _ => Cost::INVALID,
        }
    }

    fn is_dirty(&self) -> bool {
        self.core.is_dirty()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>> {
        Ok(Box::new(HashTransaction {
            base: self.core.begin()?,
            index: self,
        }))
    }

    fn close(&self) -> Result<()> {
        self.core.close()
    }
}

struct HashTransaction<'a> {
    base: TxBase<'a>,
    index: &'a NonUniqueHashIndex,
}

impl HashTransaction<'_> {
    fn filter_inner(
        &self,
        predicate: &Predicate,
        range: Option<RangeInclusive<TupleId>>,
    ) -> Result<MatchIter<'_>> {
        let index = self.index;
        let Predicate::Equals { values, .. } = predicate else {
            return Err(ValidationError::unsupported_predicate(
                index.name(),
                "only equality predicates are supported",
            )
            .into());
        };
        if !index.can_process(predicate) {
            return Err(ValidationError::unsupported_predicate(
                index.name(),
                format!("column '{}' is not indexed", predicate.column()),
            )
            .into());
        }
        let column = index.column();
        let keys = values
            .iter()
            .map(|v| {
                column.check(Some(v))?;
                entry_key(v)
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = self.base.snapshot()?;
        if snapshot.dirty {
            return Err(LifecycleError::StaleIndex(index.name().to_string()).into());
        }

        let lookup = move |query: usize| read_entries(&snapshot, &keys[query]);
        Ok(Box::new(LazyMatches::new(values.len(), range, lookup)))
    }

    fn insert_entry(&mut self, record: &Record) -> Result<()> {
        let Some(value) = record.value(self.index.position) else {
            return Ok(());
        };
        let key = entry_key(value)?;
        let txn = self.base.write()?;
        let mut table = txn.open_multimap_table(HASH_ENTRIES_TABLE)?;
        table.insert(key.as_slice(), record.tuple_id.as_u64())?;
        Ok(())
    }

    fn remove_entry(&mut self, record: &Record) -> Result<()> {
        let Some(value) = record.value(self.index.position) else {
            return Ok(());
        };
        let key = entry_key(value)?;
        let txn = self.base.write()?;
        let mut table = txn.open_multimap_table(HASH_ENTRIES_TABLE)?;
        table.remove(key.as_slice(), record.tuple_id.as_u64())?;
        Ok(())
    }
}

impl IndexTransaction for HashTransaction<'_> {
    fn id(&self) -> TransactionId {
        self.base.id()
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        self.index.can_process(predicate)
    }

    #[instrument(skip(self), fields(index = %self.index.name(), tx = %self.base.id()))]
    fn rebuild(&mut self) -> Result<()> {
        let index = self.index;
        let position = index.position;
        let mut indexed = 0u64;

        let txn = self.base.write()?;
        txn.delete_multimap_table(HASH_ENTRIES_TABLE)?;
        {
            let mut table = txn.open_multimap_table(HASH_ENTRIES_TABLE)?;
            index.entity.scan_all(&mut |record| {
                if let Some(value) = record.value(position) {
                    let key = entry_key(value)?;
                    table.insert(key.as_slice(), record.tuple_id.as_u64())?;
                    indexed += 1;
                }
                Ok(())
            })?;
        }
        self.base.set_dirty(false)?;

        info!(indexed, "Hash index rebuilt");
        Ok(())
    }

    fn update(&mut self, event: &DataChangeEvent) -> Result<()> {
        match event {
            DataChangeEvent::Insert { new } => self.insert_entry(new),
            DataChangeEvent::Delete { old } => self.remove_entry(old),
            DataChangeEvent::Update { old, new } => {
                let position = self.index.position;
                if old.value(position) == new.value(position) {
                    return Ok(());
                }
                self.remove_entry(old)?;
                self.insert_entry(new)
            }
        }
    }

    fn mark_dirty(&mut self) -> Result<()> {
        self.base.set_dirty(true)
    }

    fn filter(&self, predicate: &Predicate) -> Result<MatchIter<'_>> {
        self.filter_inner(predicate, None)
    }

    fn filter_range(
        &self,
        predicate: &Predicate,
        range: RangeInclusive<TupleId>,
    ) -> Result<MatchIter<'_>> {
        self.filter_inner(predicate, Some(range))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.base.commit()
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.base.rollback()
    }
}

fn read_entries(snapshot: &Snapshot<'_>, key: &[u8]) -> Result<Vec<TupleId>> {
    match &snapshot.source {
        SnapshotSource::Committed(txn) => {
            match optional_table(txn.open_multimap_table(HASH_ENTRIES_TABLE))? {
                Some(table) => entry_ids(&table, key),
                None => Ok(Vec::new()),
            }
        }
        SnapshotSource::Pending(txn) => {
            let table = txn.open_multimap_table(HASH_ENTRIES_TABLE)?;
            entry_ids(&table, key)
        }
    }
}

fn entry_ids<T>(table: &T, key: &[u8]) -> Result<Vec<TupleId>>
where
    T: ReadableMultimapTable<&'static [u8], u64>,
{
    let mut ids = Vec::new();
    for entry in table.get(key)? {
        ids.push(TupleId::new(entry.map_err(VectraError::from)?.value()));
    }
    Ok(ids)
}
