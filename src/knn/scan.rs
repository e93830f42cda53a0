//! Exact kNN by full scan.
//!
//! The sequential path visits every record once and keeps one
//! [`BoundedTopK`] per query vector. The parallel path splits the tuple id
//! space into contiguous partitions, hands them to scoped worker threads
//! over a bounded channel, and merges each partition's local top-k into a
//! [`SharedTopK`] per query vector. Both paths return identical results.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{Result, VectraError};
use crate::storage::EntitySource;
use crate::types::TupleId;
use crate::value::Record;

use super::{BoundedTopK, Candidate, KnnPredicate, SharedTopK};

/// Cooperative cancellation for long-running scans.
///
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Answers [`KnnPredicate`]s by comparing the query against every record.
pub struct ExactScanExecutor<'a> {
    source: &'a dyn EntitySource,
    parallelism: usize,
}

/// Everything a worker needs to score records; built once per execution.
struct ScanPlan<'p> {
    predicate: &'p KnnPredicate,
    position: usize,
    queries: Vec<&'p [f32]>,
}

impl ScanPlan<'_> {
    fn new_tops(&self) -> Result<Vec<BoundedTopK<Candidate>>> {
        self.queries
            .iter()
            .map(|_| BoundedTopK::new(self.predicate.k))
            .collect()
    }

    /// Scores one record against every query vector.
    fn score(&self, record: &Record, tops: &mut [BoundedTopK<Candidate>]) -> Result<()> {
        if let Some(filter) = &self.predicate.filter {
            if !filter(record) {
                return Ok(());
            }
        }
        let Some(value) = record.value(self.position) else {
            return Ok(());
        };
        let Some(vector) = value.as_float_vector() else {
            return Err(VectraError::type_mismatch(
                &self.predicate.column,
                "float vector",
                value.type_name(),
            ));
        };

        let distance = &self.predicate.distance;
        for (i, (query, top)) in self.queries.iter().zip(tops.iter_mut()).enumerate() {
            let d = match &self.predicate.weights {
                Some(weights) => distance.weighted_distance(query, vector, &weights[i]),
                None => distance.distance(query, vector),
            };
            top.offer(Candidate::new(record.tuple_id, d));
        }
        Ok(())
    }
}

impl<'a> ExactScanExecutor<'a> {
    /// Creates a sequential executor over `source`.
    pub fn new(source: &'a dyn EntitySource) -> Self {
        Self {
            source,
            parallelism: 1,
        }
    }

    /// Uses up to `parallelism` worker threads. Values below 2 scan sequentially.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Configured parallelism.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs the query to completion.
    ///
    /// Returns one list per query vector, sorted by ascending distance with
    /// ties broken by tuple id, each of length `min(k, eligible records)`.
    pub fn execute(&self, predicate: &KnnPredicate) -> Result<Vec<Vec<Candidate>>> {
        self.execute_with_cancellation(predicate, &CancellationFlag::new())
    }

    /// Like [`execute`](Self::execute), but stops early and fails with
    /// [`VectraError::Cancelled`] once `cancel` is set.
    #[instrument(
        skip(self, predicate, cancel),
        fields(column = %predicate.column, k = predicate.k, queries = predicate.query.len())
    )]
    pub fn execute_with_cancellation(
        &self,
        predicate: &KnnPredicate,
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<Candidate>>> {
        let position = predicate.validate(self.source.columns())?;
        let queries = predicate
            .query
            .iter()
            .map(|q| {
                q.as_float_vector().ok_or_else(|| {
                    VectraError::type_mismatch("query", "float vector", q.type_name())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let plan = ScanPlan {
            predicate,
            position,
            queries,
        };

        let results = if self.parallelism > 1 {
            self.scan_parallel(&plan, cancel)?
        } else {
            self.scan_sequential(&plan, cancel)?
        };
        debug!(
            found = results.iter().map(Vec::len).sum::<usize>(),
            "Exact scan complete"
        );
        Ok(results)
    }

    fn scan_sequential(
        &self,
        plan: &ScanPlan<'_>,
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<Candidate>>> {
        let mut tops = plan.new_tops()?;
        self.source.scan_all(&mut |record| {
            if cancel.is_cancelled() {
                return Err(VectraError::Cancelled);
            }
            plan.score(&record, &mut tops)
        })?;
        if cancel.is_cancelled() {
            return Err(VectraError::Cancelled);
        }
        Ok(tops.into_iter().map(BoundedTopK::into_sorted_vec).collect())
    }

    fn scan_parallel(
        &self,
        plan: &ScanPlan<'_>,
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<Candidate>>> {
        let Some(max) = self.source.max_tuple_id()? else {
            return Ok(vec![Vec::new(); plan.queries.len()]);
        };
        let partitions = partition(max, self.parallelism);
        let workers = self.parallelism.min(partitions.len());
        debug!(partitions = partitions.len(), workers, "Starting parallel scan");

        let shared = plan
            .queries
            .iter()
            .map(|_| SharedTopK::new(plan.predicate.k))
            .collect::<Result<Vec<_>>>()?;
        let first_error: Mutex<Option<VectraError>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let stop = || cancel.is_cancelled() || abort.load(Ordering::SeqCst);

        let (tx, rx) = crossbeam_channel::bounded::<RangeInclusive<TupleId>>(partitions.len());
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let shared = &shared;
                let first_error = &first_error;
                let abort = &abort;
                let stop = &stop;
                scope.spawn(move || {
                    while let Ok(range) = rx.recv() {
                        if stop() {
                            break;
                        }
                        match self.scan_partition(plan, range, stop) {
                            Ok(tops) => {
                                for (top, target) in tops.into_iter().zip(shared) {
                                    target.offer_all(top.into_sorted_vec());
                                }
                            }
                            Err(VectraError::Cancelled) => break,
                            Err(e) => {
                                warn!(error = %e, "Scan partition failed, cancelling siblings");
                                abort.store(true, Ordering::SeqCst);
                                first_error.lock().get_or_insert(e);
                                break;
                            }
                        }
                    }
                });
            }
            for range in partitions {
                if stop() || tx.send(range).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(VectraError::Cancelled);
        }
        Ok(shared.into_iter().map(SharedTopK::into_sorted_vec).collect())
    }

    fn scan_partition(
        &self,
        plan: &ScanPlan<'_>,
        range: RangeInclusive<TupleId>,
        stop: &dyn Fn() -> bool,
    ) -> Result<Vec<BoundedTopK<Candidate>>> {
        let mut tops = plan.new_tops()?;
        self.source.scan(range, &mut |record| {
            if stop() {
                return Err(VectraError::Cancelled);
            }
            plan.score(&record, &mut tops)
        })?;
        Ok(tops)
    }
}

/// Splits `0..=max` into at most `parts` contiguous, non-empty ranges.
fn partition(max: TupleId, parts: usize) -> Vec<RangeInclusive<TupleId>> {
    let total = max.as_u64().saturating_add(1);
    let parts = (parts as u64).clamp(1, total.max(1));
    let base = total / parts;
    let extra = total % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0u64;
    for i in 0..parts {
        let len = base + u64::from(i < extra);
        let end = start + len - 1;
        ranges.push(TupleId::new(start)..=TupleId::new(end));
        start = end + 1;
    }
    ranges
}
