//! SuperBit locality sensitive hashing over one vector column.
//!
//! Each stage is a redb table mapping bucket id to the packed tuple ids
//! hashed there. A filter hashes every query vector with the same family and
//! returns the union of its buckets across stages: a candidate set, not a
//! ranking. Results can miss true neighbors.
//!
//! The index only supports full rebuilds; every data change marks it dirty.

pub mod config;
pub mod superbit;

pub use config::{SamplingMethod, SuperBitLshConfig};
pub use superbit::SuperBitHasher;

use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{LifecycleError, Result, StorageError, ValidationError, VectraError};
use crate::storage::schema::lsh_stage_table_name;
use crate::storage::EntitySource;
use crate::types::{TransactionId, TupleId};
use crate::value::{ColumnDef, Value};

use super::lifecycle::{optional_table, IndexCore, Snapshot, SnapshotSource, TxBase};
use super::matches::LazyMatches;
use super::store::IndexStore;
use super::{
    Cost, DataChangeEvent, Index, IndexHeader, IndexTransaction, IndexType, MatchIter, Predicate,
};

type StageTable<'a> = TableDefinition<'a, u32, &'static [u8]>;

fn stage_table(name: &str) -> StageTable<'_> {
    TableDefinition::new(name)
}

/// A SuperBit-LSH index.
pub struct SuperBitLshIndex {
    core: IndexCore,
    config: SuperBitLshConfig,
    hasher: SuperBitHasher,
    entity: Arc<dyn EntitySource>,
}

impl SuperBitLshIndex {
    #[instrument(skip(header, entity, cfg), fields(index = %header.name))]
    pub(crate) fn create(
        path: &Path,
        header: IndexHeader,
        config: SuperBitLshConfig,
        entity: Arc<dyn EntitySource>,
        cfg: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let hasher = build_hasher(&header, &config)?;
        let packed = config.encode()?;

        let stages = config.stages as usize;
        let store = IndexStore::create(path, &header, Some(packed.as_slice()), cfg, |txn| {
            for stage in 0..stages {
                let name = lsh_stage_table_name(stage);
                txn.open_table(stage_table(&name))?;
            }
            Ok(())
        })?;

        info!(
            buckets = config.buckets,
            stages = config.stages,
            seed = config.seed,
            "SuperBit-LSH index created"
        );
        Ok(Self {
            core: IndexCore::new(store, header, true, cfg),
            config,
            hasher,
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
        let (config, dirty) = match store.read_config()? {
            Some(bytes) => (SuperBitLshConfig::decode(&bytes)?, store.read_dirty()?),
            None => {
                warn!("No stored config for SuperBit-LSH index, falling back to placeholder");
                store.persist_dirty(true)?;
                (SuperBitLshConfig::PLACEHOLDER, true)
            }
        };
        let hasher = build_hasher(&header, &config)?;

        debug!(dirty, "SuperBit-LSH index opened");
        Ok(Self {
            core: IndexCore::new(store, header, dirty, cfg),
            config,
            hasher,
            entity,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &SuperBitLshConfig {
        &self.config
    }

    /// The hash family queries and records are hashed with.
    pub fn hasher(&self) -> &SuperBitHasher {
        &self.hasher
    }

    fn column(&self) -> &ColumnDef {
        &self.core.header().columns[0]
    }

    /// Hash input for a stored or query value of the indexed column.
    fn input_for(&self, value: &Value) -> Result<Vec<f64>> {
        let column = self.column();
        let expected = column.column_type.dimension().unwrap_or_default();
        match value.dimension() {
            Some(d) if d != expected => {
                return Err(ValidationError::dimension_mismatch(expected, d).into())
            }
            _ => {}
        }
        superbit::lsh_input(value, self.config.consider_imaginary).ok_or_else(|| {
            VectraError::type_mismatch(&column.name, column.column_type.type_name(), value.type_name())
        })
    }

    fn unsupported(&self, predicate: &Predicate) -> VectraError {
        let reason = match predicate {
            Predicate::Knn(knn) if knn.column != self.column().name => {
                format!("column '{}' is not indexed", knn.column)
            }
            Predicate::Knn(knn) if !knn.distance.is_angular() => {
                format!("distance {} is not angular", knn.distance.name())
            }
            Predicate::Knn(_) => "complex query vectors need considerimaginary".to_string(),
            Predicate::Equals { .. } => "only kNN predicates are supported".to_string(),
        };
        ValidationError::unsupported_predicate(self.core.name(), reason).into()
    }
}

fn build_hasher(header: &IndexHeader, config: &SuperBitLshConfig) -> Result<SuperBitHasher> {
    let [column] = header.columns.as_slice() else {
        return Err(ValidationError::invalid_field(
            "columns",
            "a SuperBit-LSH index covers exactly one vector column",
        )
        .into());
    };
    let Some(dimension) = column.column_type.dimension() else {
        return Err(VectraError::type_mismatch(
            &column.name,
            "vector",
            column.column_type.type_name(),
        ));
    };
    let input_dimension = if config.consider_imaginary {
        dimension * 2
    } else {
        dimension
    };
    SuperBitHasher::new(config, input_dimension)
}

impl Index for SuperBitLshIndex {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn index_type(&self) -> IndexType {
        IndexType::SuperBitLsh
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
        false
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Knn(knn) => {
                knn.column == self.column().name
                    && knn.distance.is_angular()
                    && (self.config.consider_imaginary || !knn.has_complex_query())
            }
            Predicate::Equals { .. } => false,
        }
    }

    fn cost(&self, predicate: &Predicate) -> Cost {
        let Predicate::Knn(knn) = predicate else {
            return Cost::INVALID;
        };
        if self.is_dirty() || !self.can_process(predicate) {
            return Cost::INVALID;
        }
        let queries = knn.query.len() as f64;
        let stages = f64::from(self.config.stages);
        let bits = self.hasher.signature_len() as f64;
        let dimension = self.hasher.dimension() as f64;
        Cost::new(queries * stages, queries * bits * dimension, queries * stages)
    }

    fn is_dirty(&self) -> bool {
        self.core.is_dirty()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>> {
        Ok(Box::new(SuperBitLshTransaction {
            base: self.core.begin()?,
            index: self,
        }))
    }

    fn close(&self) -> Result<()> {
        self.core.close()
    }
}

// ============================================================================
// Transaction
// ============================================================================

struct SuperBitLshTransaction<'a> {
    base: TxBase<'a>,
    index: &'a SuperBitLshIndex,
}

impl SuperBitLshTransaction<'_> {
    /// First non-NULL value of the indexed column, by linear probe.
    fn acquire_specimen(&self, position: usize) -> Result<Option<Value>> {
        let Some(max) = self.index.entity.max_tuple_id()? else {
            return Ok(None);
        };
        let mut id = TupleId::FIRST;
        while id <= max {
            if let Some(record) = self.index.entity.read(id)? {
                if let Some(value) = record.values.into_iter().nth(position).flatten() {
                    return Ok(Some(value));
                }
            }
            id = id.next();
        }
        Ok(None)
    }

    fn filter_inner(
        &self,
        predicate: &Predicate,
        range: Option<RangeInclusive<TupleId>>,
    ) -> Result<MatchIter<'_>> {
        let index = self.index;
        let Predicate::Knn(knn) = predicate else {
            return Err(index.unsupported(predicate));
        };
        if !index.can_process(predicate) {
            return Err(index.unsupported(predicate));
        }
        knn.validate(index.columns())?;

        // Waits for a running rebuild before looking at the dirty flag.
        let snapshot = self.base.snapshot()?;
        if snapshot.dirty {
            return Err(LifecycleError::StaleIndex(index.name().to_string()).into());
        }

        let inputs = knn
            .query
            .iter()
            .map(|q| index.input_for(q))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            index = %index.name(),
            tx = %self.base.id(),
            queries = inputs.len(),
            "Filtering SuperBit-LSH index"
        );

        // Stage order, bucket insertion order; ids agreeing on several stages repeat.
        let hasher = &index.hasher;
        let lookup = move |query: usize| -> Result<Vec<TupleId>> {
            let mut ids = Vec::new();
            for (stage, bucket) in hasher.bucket_ids(&inputs[query]).into_iter().enumerate() {
                ids.extend(read_bucket(&snapshot, stage, bucket)?);
            }
            Ok(ids)
        };
        Ok(Box::new(LazyMatches::new(knn.query.len(), range, lookup)))
    }
}

impl IndexTransaction for SuperBitLshTransaction<'_> {
    fn id(&self) -> TransactionId {
        self.base.id()
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        self.index.can_process(predicate)
    }

    #[instrument(skip(self), fields(index = %self.index.name(), tx = %self.base.id()))]
    fn rebuild(&mut self) -> Result<()> {
        let index = self.index;
        let column = index.column();
        let position = index.entity.column_position(&column.name)?;

        // Lock before scanning: a concurrent mark_dirty then lands after
        // this commit instead of being overwritten by it.
        self.base.write()?;

        match self.acquire_specimen(position)? {
            Some(specimen) => {
                index.input_for(&specimen)?;
                debug!(dimension = ?specimen.dimension(), "Acquired specimen");
            }
            None => debug!("Entity has no values to index"),
        }

        let stages = index.config.stages as usize;
        let buckets = index.config.buckets as usize;
        let mut maps: Vec<Vec<Vec<TupleId>>> = vec![vec![Vec::new(); buckets]; stages];
        let mut indexed = 0u64;
        index.entity.scan_all(&mut |record| {
            let Some(value) = record.value(position) else {
                return Ok(());
            };
            let input = index.input_for(value)?;
            for (stage, bucket) in index.hasher.bucket_ids(&input).into_iter().enumerate() {
                maps[stage][bucket as usize].push(record.tuple_id);
            }
            indexed += 1;
            Ok(())
        })?;

        let txn = self.base.write()?;
        for (stage, stage_buckets) in maps.iter().enumerate() {
            let name = lsh_stage_table_name(stage);
            let definition = stage_table(&name);
            txn.delete_table(definition)?;
            let mut table = txn.open_table(definition)?;
            for (bucket, ids) in stage_buckets.iter().enumerate() {
                let bytes: Vec<u8> = ids.iter().flat_map(|id| id.to_le_bytes()).collect();
                table.insert(bucket as u32, bytes.as_slice())?;
            }
        }
        self.base.set_dirty(false)?;

        info!(indexed, stages, buckets, "SuperBit-LSH index rebuilt");
        Ok(())
    }

    fn update(&mut self, _event: &DataChangeEvent) -> Result<()> {
        Err(VectraError::unsupported(self.index.name(), "update"))
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

fn read_bucket(snapshot: &Snapshot<'_>, stage: usize, bucket: u32) -> Result<Vec<TupleId>> {
    let name = lsh_stage_table_name(stage);
    let definition = stage_table(&name);
    match &snapshot.source {
        SnapshotSource::Committed(txn) => match optional_table(txn.open_table(definition))? {
            Some(table) => bucket_ids(&table, bucket),
            None => Ok(Vec::new()),
        },
        SnapshotSource::Pending(txn) => {
            let table = txn.open_table(definition)?;
            bucket_ids(&table, bucket)
        }
    }
}

fn bucket_ids<T>(table: &T, bucket: u32) -> Result<Vec<TupleId>>
where
    T: ReadableTable<u32, &'static [u8]>,
{
    let Some(entry) = table.get(bucket)? else {
        return Ok(Vec::new());
    };
    let bytes = entry.value();
    if bytes.len() % 8 != 0 {
        return Err(StorageError::corrupted(format!(
            "LSH bucket {} has {} bytes, not a multiple of 8",
            bucket,
            bytes.len()
        ))
        .into());
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            TupleId::from_le_bytes(raw)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Distance;
    use crate::knn::KnnPredicate;
    use crate::storage::RedbEntityStore;
    use crate::value::{ColumnType, Complex32};
    use crate::index::IndexParams;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        entity: Arc<RedbEntityStore>,
    }

    fn fixture(column_type: ColumnType) -> Fixture {
        let dir = tempdir().unwrap();
        let columns = vec![ColumnDef::nullable("feature", column_type)];
        let entity = Arc::new(
            RedbEntityStore::open(dir.path().join("entity.redb"), &columns, &Config::default())
                .unwrap(),
        );
        Fixture { dir, entity }
    }

    fn params(buckets: u32, stages: u32, seed: i64) -> IndexParams {
        SuperBitLshConfig::new(buckets, stages, seed).to_params()
    }

    fn create(f: &Fixture, params: &IndexParams) -> Box<dyn Index> {
        IndexType::SuperBitLsh
            .create(
                f.dir.path().join("lsh.idx"),
                "lsh",
                f.entity.columns().to_vec(),
                params,
                f.entity.clone(),
                &Config::default(),
            )
            .unwrap()
    }

    fn rebuild(index: &dyn Index) {
        let mut tx = index.begin().unwrap();
        tx.rebuild().unwrap();
        tx.commit().unwrap();
    }

    fn knn(query: Value) -> Predicate {
        KnnPredicate::new("feature", 5, query, Distance::Cosine).into()
    }

    #[test]
    fn test_created_dirty_and_stale() {
        let f = fixture(ColumnType::FloatVector(3));
        let index = create(&f, &params(4, 2, 42));
        assert!(index.is_dirty());
        assert!(index.cost(&knn(vec![1.0, 0.0, 0.0].into())).is_invalid());

        let tx = index.begin().unwrap();
        let err = tx.filter(&knn(vec![1.0, 0.0, 0.0].into())).err().unwrap();
        assert!(matches!(
            err,
            VectraError::Lifecycle(LifecycleError::StaleIndex(_))
        ));
    }

    #[test]
    fn test_rebuild_then_self_lookup() {
        let f = fixture(ColumnType::FloatVector(3));
        let mut ids = Vec::new();
        for i in 0..20 {
            let v = vec![i as f32, (20 - i) as f32, 1.0];
            ids.push(f.entity.insert(vec![Some(v.into())]).unwrap().tuple_id);
        }
        f.entity.insert(vec![None]).unwrap();

        let index = create(&f, &params(4, 2, 42));
        rebuild(index.as_ref());
        assert!(!index.is_dirty());
        assert!(!index.cost(&knn(vec![1.0, 0.0, 0.0].into())).is_invalid());

        let tx = index.begin().unwrap();
        for (i, id) in ids.iter().enumerate() {
            let q = vec![i as f32, (20 - i) as f32, 1.0];
            let found: Vec<_> = tx.filter(&knn(q.into())).unwrap().map(|m| m.unwrap()).collect();
            assert!(found.iter().any(|m| m.tuple_id == *id && m.query_index == 0));
        }
    }

    #[test]
    fn test_filter_sees_own_rebuild() {
        let f = fixture(ColumnType::FloatVector(2));
        let id = f.entity.insert(vec![Some(vec![1.0, 1.0].into())]).unwrap().tuple_id;
        let index = create(&f, &params(4, 2, 1));

        let mut tx = index.begin().unwrap();
        tx.rebuild().unwrap();
        let found: Vec<_> = tx
            .filter(&knn(vec![1.0, 1.0].into()))
            .unwrap()
            .map(|m| m.unwrap().tuple_id)
            .collect();
        // one hit per stage
        assert_eq!(found, vec![id, id]);
        tx.rollback().unwrap();
        assert!(index.is_dirty());
    }

    #[test]
    fn test_update_unsupported() {
        let f = fixture(ColumnType::FloatVector(2));
        let record = f.entity.insert(vec![Some(vec![1.0, 0.0].into())]).unwrap();
        let index = create(&f, &params(4, 2, 1));
        rebuild(index.as_ref());

        assert!(!index.supports_incremental_update());
        let mut tx = index.begin().unwrap();
        let err = tx.update(&DataChangeEvent::Insert { new: record }).unwrap_err();
        assert!(err.is_unsupported());
        tx.commit().unwrap();
        assert!(!index.is_dirty());
    }

    #[test]
    fn test_can_process() {
        let f = fixture(ColumnType::FloatVector(2));
        let index = create(&f, &params(4, 2, 1));
        let q: Value = vec![1.0, 0.0].into();

        assert!(index.can_process(&knn(q.clone())));
        for distance in [Distance::RealInnerProduct, Distance::AbsoluteInnerProduct] {
            assert!(index.can_process(&KnnPredicate::new("feature", 1, q.clone(), distance).into()));
        }
        assert!(!index.can_process(&KnnPredicate::new("feature", 1, q.clone(), Distance::L2).into()));
        assert!(!index.can_process(&KnnPredicate::new("other", 1, q.clone(), Distance::Cosine).into()));
        assert!(!index.can_process(&Predicate::equals("feature", vec![q])));

        let complex: Value = vec![Complex32::new(1.0, 0.0), Complex32::new(0.0, 1.0)].into();
        assert!(!index.can_process(&knn(complex)));

        let tx = index.begin().unwrap();
        let err = tx
            .filter(&KnnPredicate::new("feature", 1, vec![1.0, 0.0].into(), Distance::L1).into())
            .err()
            .unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_complex_column_with_imaginary_parts() {
        let f = fixture(ColumnType::ComplexVector(2));
        let v: Value = vec![Complex32::new(1.0, 2.0), Complex32::new(-1.0, 0.5)].into();
        let id = f.entity.insert(vec![Some(v.clone())]).unwrap().tuple_id;

        let mut p = params(8, 2, 3);
        p.insert("considerimaginary".into(), "1".into());
        let index = create(&f, &p);
        rebuild(index.as_ref());
        assert!(index.can_process(&knn(v.clone())));

        let tx = index.begin().unwrap();
        let found: Vec<_> = tx.filter(&knn(v)).unwrap().map(|m| m.unwrap().tuple_id).collect();
        assert_eq!(found, vec![id, id]);
    }

    #[test]
    fn test_filter_range() {
        let f = fixture(ColumnType::FloatVector(2));
        for _ in 0..4 {
            f.entity.insert(vec![Some(vec![1.0, 1.0].into())]).unwrap();
        }
        let index = create(&f, &params(2, 1, 9));
        rebuild(index.as_ref());

        let tx = index.begin().unwrap();
        let found: Vec<_> = tx
            .filter_range(&knn(vec![1.0, 1.0].into()), TupleId::new(1)..=TupleId::new(2))
            .unwrap()
            .map(|m| m.unwrap().tuple_id.as_u64())
            .collect();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_multiple_queries_tagged() {
        let f = fixture(ColumnType::FloatVector(2));
        f.entity.insert(vec![Some(vec![1.0, 0.0].into())]).unwrap();
        let index = create(&f, &params(4, 2, 1));
        rebuild(index.as_ref());

        let predicate: Predicate = KnnPredicate::batch(
            "feature",
            1,
            vec![vec![1.0, 0.0].into(), vec![1.0, 0.0].into()],
            Distance::Cosine,
        )
        .into();
        let tx = index.begin().unwrap();
        let tags: Vec<_> = tx
            .filter(&predicate)
            .unwrap()
            .map(|m| m.unwrap().query_index)
            .collect();
        assert_eq!(tags, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_missing_config_falls_back_to_placeholder() {
        let f = fixture(ColumnType::FloatVector(2));
        let path = f.dir.path().join("lsh.idx");
        {
            let index = create(&f, &params(4, 2, 1));
            rebuild(index.as_ref());
            index.close().unwrap();
        }
        {
            let db = redb::Database::open(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn
                    .open_table(crate::storage::schema::INDEX_META_TABLE)
                    .unwrap();
                table.remove(crate::storage::schema::CONFIG_KEY).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = IndexStore::open(&path, &Config::default()).unwrap();
        let header = store.read_header().unwrap();
        let index =
            SuperBitLshIndex::open(store, header, f.entity.clone(), &Config::default()).unwrap();
        assert_eq!(*index.config(), SuperBitLshConfig::PLACEHOLDER);
        assert!(index.is_dirty());
    }
}
