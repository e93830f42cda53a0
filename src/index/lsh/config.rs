//! SuperBit-LSH configuration.
//!
//! Parsed from string creation parameters and persisted in the index store
//! as a packed varint record.

use std::fmt;
use std::str::FromStr;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError, ValidationError};
use crate::index::IndexParams;

/// Parameter key for the number of buckets per stage.
pub const BUCKETS_KEY: &str = "buckets";
/// Parameter key for the number of stages.
pub const STAGES_KEY: &str = "stages";
/// Parameter key for the hyperplane seed.
pub const SEED_KEY: &str = "seed";
/// Parameter key for imaginary-part handling (integer, non-zero means true).
pub const CONSIDER_IMAGINARY_KEY: &str = "considerimaginary";
/// Parameter key for the sampling method (`GAUSSIAN` or `UNIFORM`).
pub const SAMPLING_METHOD_KEY: &str = "samplingmethod";

/// Distribution the random hyperplanes are drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplingMethod {
    /// Standard normal components.
    #[default]
    Gaussian,
    /// Components uniform in `[-1, 1)`.
    Uniform,
}

impl SamplingMethod {
    fn ordinal(self) -> u32 {
        match self {
            Self::Gaussian => 0,
            Self::Uniform => 1,
        }
    }

    fn from_ordinal(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Gaussian),
            1 => Some(Self::Uniform),
            _ => None,
        }
    }

    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gaussian => "GAUSSIAN",
            Self::Uniform => "UNIFORM",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GAUSSIAN" => Ok(Self::Gaussian),
            "UNIFORM" => Ok(Self::Uniform),
            other => Err(ValidationError::invalid_field(
                SAMPLING_METHOD_KEY,
                format!("unknown sampling method '{}'", other),
            )),
        }
    }
}

/// Parameters of a SuperBit-LSH index.
///
/// `seed` fixes the hyperplanes, so two indexes with equal configs hash
/// identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBitLshConfig {
    /// Buckets per stage.
    pub buckets: u32,
    /// Number of stages (bucket tables).
    pub stages: u32,
    /// Hyperplane seed.
    pub seed: i64,
    /// Hash real and imaginary parts of complex vectors.
    pub consider_imaginary: bool,
    /// Hyperplane distribution.
    pub sampling_method: SamplingMethod,
}

/// On-disk layout; field order is the storage order.
#[derive(Serialize, Deserialize)]
struct PackedConfig {
    buckets: u32,
    stages: u32,
    seed: i64,
    consider_imaginary: u32,
    sampling_method: u32,
}

impl SuperBitLshConfig {
    /// Used when an index store has no stored config; such an index is dirty.
    pub const PLACEHOLDER: SuperBitLshConfig = SuperBitLshConfig {
        buckets: 1,
        stages: 1,
        seed: 123,
        consider_imaginary: true,
        sampling_method: SamplingMethod::Gaussian,
    };

    /// Creates a config over real vectors with Gaussian hyperplanes.
    pub fn new(buckets: u32, stages: u32, seed: i64) -> Self {
        Self {
            buckets,
            stages,
            seed,
            consider_imaginary: false,
            sampling_method: SamplingMethod::Gaussian,
        }
    }

    /// Sets imaginary-part handling.
    pub fn with_consider_imaginary(mut self, consider_imaginary: bool) -> Self {
        self.consider_imaginary = consider_imaginary;
        self
    }

    /// Sets the hyperplane distribution.
    pub fn with_sampling_method(mut self, sampling_method: SamplingMethod) -> Self {
        self.sampling_method = sampling_method;
        self
    }

    /// Checks the config.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.buckets == 0 {
            return Err(ValidationError::invalid_field(BUCKETS_KEY, "must be at least 1"));
        }
        if self.stages == 0 {
            return Err(ValidationError::invalid_field(STAGES_KEY, "must be at least 1"));
        }
        Ok(())
    }

    /// Parses creation parameters.
    ///
    /// `buckets`, `stages` and `seed` are required. `considerimaginary`
    /// defaults to false and `samplingmethod` to `GAUSSIAN`.
    pub fn from_params(params: &IndexParams) -> Result<Self> {
        let buckets = parse_required(params, BUCKETS_KEY)?;
        let stages = parse_required(params, STAGES_KEY)?;
        let seed = parse_required(params, SEED_KEY)?;

        let consider_imaginary = match params.get(CONSIDER_IMAGINARY_KEY) {
            Some(raw) => parse_flag(raw)?,
            None => false,
        };
        let sampling_method = match params.get(SAMPLING_METHOD_KEY) {
            Some(raw) => raw.parse()?,
            None => SamplingMethod::default(),
        };

        let config = Self {
            buckets,
            stages,
            seed,
            consider_imaginary,
            sampling_method,
        };
        config.validate()?;
        Ok(config)
    }

    /// Renders the config as creation parameters.
    pub fn to_params(&self) -> IndexParams {
        let mut params = IndexParams::new();
        params.insert(BUCKETS_KEY.to_string(), self.buckets.to_string());
        params.insert(STAGES_KEY.to_string(), self.stages.to_string());
        params.insert(SEED_KEY.to_string(), self.seed.to_string());
        params.insert(
            CONSIDER_IMAGINARY_KEY.to_string(),
            u8::from(self.consider_imaginary).to_string(),
        );
        params.insert(
            SAMPLING_METHOD_KEY.to_string(),
            self.sampling_method.to_string(),
        );
        params
    }

    /// Packs the config with varint encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let packed = PackedConfig {
            buckets: self.buckets,
            stages: self.stages,
            seed: self.seed,
            consider_imaginary: u32::from(self.consider_imaginary),
            sampling_method: self.sampling_method.ordinal(),
        };
        Ok(codec().serialize(&packed)?)
    }

    /// Unpacks a config written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let packed: PackedConfig = codec()
            .deserialize(bytes)
            .map_err(|e| StorageError::corrupted(format!("Invalid LSH config: {}", e)))?;
        let sampling_method = SamplingMethod::from_ordinal(packed.sampling_method).ok_or_else(|| {
            StorageError::corrupted(format!(
                "Invalid LSH sampling method ordinal {}",
                packed.sampling_method
            ))
        })?;
        let config = Self {
            buckets: packed.buckets,
            stages: packed.stages,
            seed: packed.seed,
            consider_imaginary: packed.consider_imaginary != 0,
            sampling_method,
        };
        config
            .validate()
            .map_err(|e| StorageError::corrupted(format!("Invalid LSH config: {}", e)))?;
        Ok(config)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_varint_encoding()
}

fn parse_required<T: FromStr>(params: &IndexParams, key: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    let raw = params
        .get(key)
        .ok_or_else(|| ValidationError::required_field(key))?;
    raw.trim()
        .parse()
        .map_err(|e| ValidationError::invalid_field(key, format!("'{}': {}", raw, e)).into())
}

fn parse_flag(raw: &str) -> Result<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    raw.parse::<i64>().map(|v| v != 0).map_err(|_| {
        ValidationError::invalid_field(
            CONSIDER_IMAGINARY_KEY,
            format!("expected an integer or boolean, got '{}'", raw),
        )
        .into()
    })
}
