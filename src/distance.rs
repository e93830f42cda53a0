//! Distance metrics for nearest-neighbor search.
//!
//! All metrics operate on `&[f32]` and accumulate in `f64`. Smaller is
//! closer. Callers plug their own metric in through [`DistanceFunction`]
//! and [`Distance::Custom`].

use std::fmt;
use std::sync::Arc;

/// A pure distance capability.
///
/// Implementations must be deterministic and must not panic on vectors of
/// equal length; length checks happen before the call.
pub trait DistanceFunction: Send + Sync {
    /// Distance between `a` and `b`.
    fn distance(&self, a: &[f32], b: &[f32]) -> f64;

    /// Weighted distance. Each component's contribution is scaled by `w[i]`.
    fn weighted_distance(&self, a: &[f32], b: &[f32], w: &[f32]) -> f64;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;
}

/// Built-in metrics.
#[derive(Clone)]
pub enum Distance {
    /// Manhattan distance.
    L1,
    /// Euclidean distance.
    L2,
    /// Squared Euclidean distance (monotone in L2, cheaper).
    SquaredL2,
    /// `1 - cos(a, b)`. A zero-norm operand yields `1.0`.
    Cosine,
    /// `1 - <a, b>`.
    RealInnerProduct,
    /// `1 - |<a, b>|`.
    AbsoluteInnerProduct,
    /// Chi-squared distance; components with `a + b == 0` are skipped.
    Chisquared,
    /// Number of differing components.
    Hamming,
    /// Caller supplied metric.
    Custom(Arc<dyn DistanceFunction>),
}

impl Distance {
    /// Distance between two vectors of equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Self::L1 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (*x as f64 - *y as f64).abs())
                .sum(),
            Self::L2 => squared_l2(a, b, None).sqrt(),
            Self::SquaredL2 => squared_l2(a, b, None),
            Self::Cosine => cosine(a, b, None),
            Self::RealInnerProduct => 1.0 - dot(a, b, None),
            Self::AbsoluteInnerProduct => 1.0 - dot(a, b, None).abs(),
            Self::Chisquared => chisquared(a, b, None),
            Self::Hamming => a.iter().zip(b).filter(|(x, y)| x != y).count() as f64,
            Self::Custom(f) => f.distance(a, b),
        }
    }

    /// Weighted distance between two vectors; `w` has the same length.
    #[inline]
    pub fn weighted_distance(&self, a: &[f32], b: &[f32], w: &[f32]) -> f64 {
        debug_assert_eq!(a.len(), w.len());
        match self {
            Self::L1 => a
                .iter()
                .zip(b)
                .zip(w)
                .map(|((x, y), w)| *w as f64 * (*x as f64 - *y as f64).abs())
                .sum(),
            Self::L2 => squared_l2(a, b, Some(w)).sqrt(),
            Self::SquaredL2 => squared_l2(a, b, Some(w)),
            Self::Cosine => cosine(a, b, Some(w)),
            Self::RealInnerProduct => 1.0 - dot(a, b, Some(w)),
            Self::AbsoluteInnerProduct => 1.0 - dot(a, b, Some(w)).abs(),
            Self::Chisquared => chisquared(a, b, Some(w)),
            Self::Hamming => a
                .iter()
                .zip(b)
                .zip(w)
                .filter(|((x, y), _)| x != y)
                .map(|(_, w)| *w as f64)
                .sum(),
            Self::Custom(f) => f.weighted_distance(a, b, w),
        }
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::SquaredL2 => "SquaredL2",
            Self::Cosine => "Cosine",
            Self::RealInnerProduct => "RealInnerProduct",
            Self::AbsoluteInnerProduct => "AbsoluteInnerProduct",
            Self::Chisquared => "Chisquared",
            Self::Hamming => "Hamming",
            Self::Custom(f) => f.name(),
        }
    }

    /// Returns true for the angular metrics that random-hyperplane hashing preserves.
    pub fn is_angular(&self) -> bool {
        matches!(
            self,
            Self::Cosine | Self::RealInnerProduct | Self::AbsoluteInnerProduct
        )
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(func) => write!(f, "Custom({})", func.name()),
            other => f.write_str(other.name()),
        }
    }
}

#[inline]
fn weight(w: Option<&[f32]>, i: usize) -> f64 {
    w.map_or(1.0, |w| w[i] as f64)
}

fn squared_l2(a: &[f32], b: &[f32], w: Option<&[f32]>) -> f64 {
    a.iter()
        .zip(b)
        .enumerate()
        .map(|(i, (x, y))| {
            let d = *x as f64 - *y as f64;
            weight(w, i) * d * d
        })
        .sum()
}

fn dot(a: &[f32], b: &[f32], w: Option<&[f32]>) -> f64 {
    a.iter()
        .zip(b)
        .enumerate()
        .map(|(i, (x, y))| weight(w, i) * *x as f64 * *y as f64)
        .sum()
}

fn cosine(a: &[f32], b: &[f32], w: Option<&[f32]>) -> f64 {
    let mut ab = 0.0f64;
    let mut aa = 0.0f64;
    let mut bb = 0.0f64;
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let (x, y, w) = (*x as f64, *y as f64, weight(w, i));
        ab += w * x * y;
        aa += w * x * x;
        bb += w * y * y;
    }
    let norm = aa.sqrt() * bb.sqrt();
    if norm == 0.0 {
        return 1.0;
    }
    1.0 - ab / norm
}

fn chisquared(a: &[f32], b: &[f32], w: Option<&[f32]>) -> f64 {
    a.iter()
        .zip(b)
        .enumerate()
        .filter_map(|(i, (x, y))| {
            let (x, y) = (*x as f64, *y as f64);
            let sum = x + y;
            if sum == 0.0 {
                None
            } else {
                Some(weight(w, i) * (x - y) * (x - y) / sum)
            }
        })
        .sum()
}
