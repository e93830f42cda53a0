//! The SuperBit hash family.
//!
//! SuperBit draws `K = stages * buckets / 2` random hyperplanes in batches
//! of `N` (the largest `N <= d` dividing `K`) and orthonormalizes each batch.
//! A vector's signature is one bit per hyperplane (`dot >= 0`); the bits are
//! split into `stages` consecutive groups and each group is folded into a
//! bucket id. Vectors at a small angle share buckets with high probability.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, ValidationError};
use crate::value::Value;

use super::config::{SamplingMethod, SuperBitLshConfig, BUCKETS_KEY};

/// Multiplier folding signature bits into stage accumulators.
const LARGE_PRIME: u64 = 433_494_437;

/// Accumulators are kept below this modulus.
const ACCUMULATOR_MODULUS: u64 = i32::MAX as u64;

/// Upper bound on signature bits, i.e. on `stages * buckets / 2`.
pub const MAX_SIGNATURE_BITS: u64 = 1 << 16;

/// A seeded SuperBit hash family for one input dimension.
#[derive(Clone, Debug)]
pub struct SuperBitHasher {
    stages: usize,
    buckets: u64,
    dimension: usize,
    batch_size: usize,
    hyperplanes: Vec<Vec<f64>>,
}

impl SuperBitHasher {
    /// Draws the hyperplanes for inputs of length `dimension`.
    pub fn new(config: &SuperBitLshConfig, dimension: usize) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(ValidationError::invalid_field("dimension", "must be at least 1").into());
        }

        let bits = (u64::from(config.stages) * u64::from(config.buckets) / 2).max(1);
        if bits > MAX_SIGNATURE_BITS {
            return Err(ValidationError::invalid_field(
                BUCKETS_KEY,
                format!(
                    "stages * buckets / 2 = {} exceeds the maximum of {}",
                    bits, MAX_SIGNATURE_BITS
                ),
            )
            .into());
        }
        let bits = bits as usize;

        let batch_size = (1..=dimension.min(bits))
            .rev()
            .find(|n| bits % n == 0)
            .unwrap_or(1);
        let batches = bits / batch_size;

        let mut rng = StdRng::seed_from_u64(config.seed as u64);
        let mut hyperplanes = Vec::with_capacity(bits);
        for _ in 0..batches {
            let mut batch: Vec<Vec<f64>> = (0..batch_size)
                .map(|_| sample(&mut rng, config.sampling_method, dimension))
                .collect();
            orthonormalize(&mut batch);
            hyperplanes.extend(batch);
        }

        Ok(Self {
            stages: config.stages as usize,
            buckets: u64::from(config.buckets),
            dimension,
            batch_size,
            hyperplanes,
        })
    }

    /// Input length the hyperplanes were drawn for.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of signature bits (`K`).
    pub fn signature_len(&self) -> usize {
        self.hyperplanes.len()
    }

    /// Size of each orthonormal batch (`N`).
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The hyperplanes, batch after batch.
    pub fn hyperplanes(&self) -> &[Vec<f64>] {
        &self.hyperplanes
    }

    /// One bit per hyperplane: is the input on its non-negative side.
    pub fn signature(&self, input: &[f64]) -> Vec<bool> {
        self.hyperplanes
            .iter()
            .map(|h| dot(h, input) >= 0.0)
            .collect()
    }

    /// Folds a signature into one bucket id per stage.
    pub fn stage_buckets(&self, signature: &[bool]) -> Vec<u32> {
        let rows = (signature.len() / self.stages).max(1);
        let mut acc = vec![0u64; self.stages];
        for (i, bit) in signature.iter().enumerate() {
            if *bit {
                let stage = (i / rows).min(self.stages - 1);
                let v = ((i as u64 + 1) * LARGE_PRIME) % ACCUMULATOR_MODULUS;
                acc[stage] = (acc[stage] + v) % ACCUMULATOR_MODULUS;
            }
        }
        // buckets fits u32, so does the remainder
        acc.into_iter().map(|a| (a % self.buckets) as u32).collect()
    }

    /// Bucket id per stage for an input of length [`dimension`](Self::dimension).
    pub fn bucket_ids(&self, input: &[f64]) -> Vec<u32> {
        self.stage_buckets(&self.signature(input))
    }
}

/// Turns a vector value into hash input.
///
/// With `consider_imaginary` the input is the real parts followed by the
/// imaginary parts (zero for real vectors); otherwise only real parts are
/// used. Returns `None` for scalars.
pub fn lsh_input(value: &Value, consider_imaginary: bool) -> Option<Vec<f64>> {
    match value {
        Value::FloatVector(v) => {
            let mut input: Vec<f64> = v.iter().map(|x| f64::from(*x)).collect();
            if consider_imaginary {
                input.resize(v.len() * 2, 0.0);
            }
            Some(input)
        }
        Value::ComplexVector(v) => {
            let mut input: Vec<f64> = v.iter().map(|c| f64::from(c.re)).collect();
            if consider_imaginary {
                input.extend(v.iter().map(|c| f64::from(c.im)));
            }
            Some(input)
        }
        _ => None,
    }
}

fn sample(rng: &mut StdRng, method: SamplingMethod, dimension: usize) -> Vec<f64> {
    match method {
        SamplingMethod::Gaussian => (0..dimension).map(|_| gaussian(rng)).collect(),
        SamplingMethod::Uniform => (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect(),
    }
}

/// Box-Muller transform.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Gram-Schmidt over `vectors` in place.
fn orthonormalize(vectors: &mut [Vec<f64>]) {
    for i in 0..vectors.len() {
        let (done, rest) = vectors.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let projection = dot(v, u);
            for (x, y) in v.iter_mut().zip(u) {
                *x -= projection * y;
            }
        }
        let norm = dot(v, v).sqrt();
        if norm > f64::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
