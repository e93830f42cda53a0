//! Configuration types for VectraDB.
//!
//! The [`Config`] struct controls database behavior including:
//! - Scan parallelism for exact nearest-neighbor queries
//! - How long closing an index waits for live transactions
//! - Cache size and durability settings
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use vectradb::{Config, SyncMode};
//!
//! // Use defaults (sequential scans, 1s close timeout)
//! let config = Config::default();
//!
//! // Customize for a many-core host
//! let config = Config {
//!     parallelism: 8,
//!     close_timeout: Duration::from_millis(250),
//!     sync_mode: SyncMode::Normal,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Upper bound on scan workers; more partitions than this only add contention.
pub const MAX_PARALLELISM: usize = 256;

/// Database configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use vectradb::Config;
///
/// let config = Config {
///     cache_size_mb: 256,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of partitions (and worker threads) used by exact kNN scans.
    ///
    /// `1` runs scans on the caller's thread.
    /// Default: 1
    pub parallelism: usize,

    /// How long `close()` waits for live index transactions to finish.
    ///
    /// Default: 1000 ms
    pub close_timeout: Duration,

    /// Cache size in megabytes for the storage engine.
    ///
    /// Higher values improve read performance but use more memory.
    /// Default: 64 MB
    pub cache_size_mb: usize,

    /// Durability mode for write operations.
    pub sync_mode: SyncMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: 1,
            close_timeout: Duration::from_millis(1000),
            cache_size_mb: 64,
            sync_mode: SyncMode::Normal,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config whose exact scans fan out over `parallelism` workers.
    ///
    /// # Example
    /// ```rust
    /// use vectradb::Config;
    ///
    /// let config = Config::with_parallelism(4);
    /// assert!(config.is_parallel());
    /// ```
    pub fn with_parallelism(parallelism: usize) -> Self {
        Self {
            parallelism,
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `VectraDB::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `cache_size_mb` is 0
    /// - `parallelism` is 0 or > [`MAX_PARALLELISM`]
    /// - `close_timeout` is zero
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cache_size_mb == 0 {
            return Err(ValidationError::invalid_field(
                "cache_size_mb",
                "must be greater than 0",
            ));
        }

        if self.parallelism == 0 {
            return Err(ValidationError::invalid_field(
                "parallelism",
                "must be greater than 0",
            ));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(ValidationError::invalid_field(
                "parallelism",
                format!("must not exceed {}", MAX_PARALLELISM),
            ));
        }

        if self.close_timeout.is_zero() {
            return Err(ValidationError::invalid_field(
                "close_timeout",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Returns true if exact scans run on more than one thread.
    pub fn is_parallel(&self) -> bool {
        self.parallelism > 1
    }

    /// Cache size in bytes, as expected by the storage engine builder.
    pub(crate) fn cache_size_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}

/// Durability mode for write operations.
///
/// Controls the trade-off between write performance and crash safety.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit.
    ///
    /// This is the default and recommended setting. Provides good performance
    /// while ensuring committed data survives crashes.
    #[default]
    Normal,

    /// Async sync (faster writes, may lose recent data on crash).
    ///
    /// Use for bulk loading or when indexes can simply be rebuilt after a
    /// crash. Significantly faster than `Normal`.
    Fast,

    /// Sync every write operation (slowest, maximum durability).
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode syncs on every write.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }

    /// Returns true if this mode is async (may lose data on crash).
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }

    /// The redb durability level applied to write transactions.
    pub(crate) fn durability(&self) -> redb::Durability {
        match self {
            Self::Fast => redb::Durability::Eventual,
            Self::Normal => redb::Durability::Immediate,
            Self::Paranoid => redb::Durability::Paranoid,
        }
    }
}
