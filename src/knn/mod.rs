//! Nearest-neighbor queries.
//!
//! A [`KnnPredicate`] describes one kNN query: the target column, `k`,
//! one or more query vectors, a distance metric and optional weights and
//! record filter. It is answered either exactly by [`ExactScanExecutor`]
//! or approximately by an index that can process it.

mod scan;
mod selection;

pub use scan::{CancellationFlag, ExactScanExecutor};
pub use selection::{BoundedTopK, SharedTopK};

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::distance::Distance;
use crate::error::{Result, ValidationError, VectraError};
use crate::types::TupleId;
use crate::value::{ColumnDef, Record, Value};

/// Boolean record filter applied before distances are computed.
pub type RecordFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// A kNN query.
#[derive(Clone)]
pub struct KnnPredicate {
    /// Name of the vector column to search.
    pub column: String,
    /// Number of neighbors per query vector.
    pub k: usize,
    /// Query vectors; each produces its own result list.
    pub query: Vec<Value>,
    /// Distance metric.
    pub distance: Distance,
    /// Optional per-query weights, one vector per query vector.
    pub weights: Option<Vec<Vec<f32>>>,
    /// Optional filter; records it rejects never become candidates.
    pub filter: Option<RecordFilter>,
}

impl KnnPredicate {
    /// Creates a predicate for a single query vector.
    pub fn new(column: impl Into<String>, k: usize, query: Value, distance: Distance) -> Self {
        Self::batch(column, k, vec![query], distance)
    }

    /// Creates a predicate for several query vectors.
    pub fn batch(
        column: impl Into<String>,
        k: usize,
        query: Vec<Value>,
        distance: Distance,
    ) -> Self {
        Self {
            column: column.into(),
            k,
            query,
            distance,
            weights: None,
            filter: None,
        }
    }

    /// Attaches weights, one vector per query vector.
    pub fn with_weights(mut self, weights: Vec<Vec<f32>>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Attaches a record filter.
    pub fn with_filter(mut self, filter: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Returns true if any query vector is complex.
    pub fn has_complex_query(&self) -> bool {
        self.query.iter().any(Value::is_complex)
    }

    /// Checks the predicate against the entity's columns.
    ///
    /// Returns the position of the target column.
    pub fn validate(&self, columns: &[ColumnDef]) -> Result<usize> {
        if self.k == 0 {
            return Err(ValidationError::invalid_field("k", "must be greater than 0").into());
        }
        if self.query.is_empty() {
            return Err(ValidationError::required_field("query").into());
        }

        let position = columns
            .iter()
            .position(|c| c.name == self.column)
            .ok_or_else(|| ValidationError::unknown_column(&self.column))?;
        let column = &columns[position];
        let Some(dimension) = column.column_type.dimension() else {
            return Err(VectraError::type_mismatch(
                &column.name,
                "vector",
                column.column_type.type_name(),
            ));
        };

        for q in &self.query {
            match q.dimension() {
                Some(d) if d == dimension => {}
                Some(d) => return Err(ValidationError::dimension_mismatch(dimension, d).into()),
                None => {
                    return Err(VectraError::type_mismatch(
                        "query",
                        "vector",
                        q.type_name(),
                    ))
                }
            }
        }

        if let Some(weights) = &self.weights {
            if weights.len() != self.query.len() {
                return Err(ValidationError::invalid_field(
                    "weights",
                    format!(
                        "expected {} weight vectors, got {}",
                        self.query.len(),
                        weights.len()
                    ),
                )
                .into());
            }
            for w in weights {
                if w.len() != dimension {
                    return Err(ValidationError::dimension_mismatch(dimension, w.len()).into());
                }
            }
        }

        Ok(position)
    }
}

impl fmt::Debug for KnnPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnnPredicate")
            .field("column", &self.column)
            .field("k", &self.k)
            .field("queries", &self.query.len())
            .field("distance", &self.distance)
            .field("weighted", &self.weights.is_some())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// A scored record: `(tuple_id, distance)`.
///
/// Ordered by distance ascending (IEEE total order), ties by tuple id.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    /// Record the distance belongs to.
    pub tuple_id: TupleId,
    /// Distance to the query vector.
    pub distance: f64,
}

impl Candidate {
    /// Creates a candidate.
    pub fn new(tuple_id: TupleId, distance: f64) -> Self {
        Self { tuple_id, distance }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.tuple_id.cmp(&other.tuple_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::Long),
            ColumnDef::new("feature", ColumnType::FloatVector(2)),
        ]
    }

    #[test]
    fn test_candidate_ordering() {
        let a = Candidate::new(TupleId::new(2), 0.5);
        let b = Candidate::new(TupleId::new(1), 0.5);
        let c = Candidate::new(TupleId::new(0), 0.7);
        let mut v = vec![c, a, b];
        v.sort();
        assert_eq!(v, vec![b, a, c]);
    }

    #[test]
    fn test_candidate_nan_sorts_last() {
        let nan = Candidate::new(TupleId::new(0), f64::NAN);
        let one = Candidate::new(TupleId::new(1), 1.0);
        assert!(one < nan);
    }

    #[test]
    fn test_validate_ok() {
        let p = KnnPredicate::new("feature", 3, vec![0.0, 1.0].into(), Distance::L2);
        assert_eq!(p.validate(&columns()).unwrap(), 1);
    }

    #[test]
    fn test_validate_k_zero() {
        let p = KnnPredicate::new("feature", 0, vec![0.0, 1.0].into(), Distance::L2);
        assert!(p.validate(&columns()).unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_unknown_column() {
        let p = KnnPredicate::new("nope", 1, vec![0.0, 1.0].into(), Distance::L2);
        let err = p.validate(&columns()).unwrap_err();
        assert!(matches!(
            err,
            VectraError::Validation(ValidationError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_validate_scalar_column() {
        let p = KnnPredicate::new("id", 1, vec![0.0, 1.0].into(), Distance::L2);
        assert!(p.validate(&columns()).unwrap_err().is_type());
    }

    #[test]
    fn test_validate_query_dimension() {
        let p = KnnPredicate::new("feature", 1, vec![0.0, 1.0, 2.0].into(), Distance::L2);
        let err = p.validate(&columns()).unwrap_err();
        assert!(matches!(
            err,
            VectraError::Validation(ValidationError::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_validate_weights() {
        let p = KnnPredicate::new("feature", 1, vec![0.0, 1.0].into(), Distance::L2)
            .with_weights(vec![vec![1.0]]);
        assert!(p.validate(&columns()).unwrap_err().is_validation());

        let p = KnnPredicate::new("feature", 1, vec![0.0, 1.0].into(), Distance::L2)
            .with_weights(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        assert!(p.validate(&columns()).unwrap_err().is_validation());
    }

    #[test]
    fn test_debug_is_compact() {
        let p = KnnPredicate::new("feature", 1, vec![0.0, 1.0].into(), Distance::Cosine)
            .with_filter(|_| true);
        let s = format!("{:?}", p);
        assert!(s.contains("filtered: true"));
        assert!(s.contains("Cosine"));
    }
}
