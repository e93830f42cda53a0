//! Core type definitions for VectraDB identifiers and timestamps.
//!
//! Records are addressed by [`TupleId`], a dense monotonically assigned
//! integer. Index transactions carry a [`TransactionId`] (UUID v7) so log
//! lines from concurrent transactions can be told apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Record identifier within an entity.
///
/// Assigned monotonically on insert, stable for the record's lifetime and
/// never reused. The next free id is persisted with the entity metadata, so
/// ids are not reused across reopen either.
///
/// # Example
/// ```
/// use vectradb::TupleId;
///
/// let id = TupleId::new(7);
/// assert_eq!(id.as_u64(), 7);
/// assert_eq!(id.next(), TupleId::new(8));
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TupleId(pub u64);

impl TupleId {
    /// The first id handed out by an empty entity.
    pub const FIRST: TupleId = TupleId(0);

    /// Wraps a raw id.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Little-endian bytes, the on-disk form used inside LSH bucket lists.
    #[inline]
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Reads an id back from its little-endian bytes.
    #[inline]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl From<u64> for TupleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index transaction identifier (UUID v7 for time-ordering).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Creates a new TransactionId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) TransactionId.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for TransactionId {
    /// Returns a nil (all zeros) TransactionId.
    ///
    /// For a new unique ID, use [`TransactionId::new()`].
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch, returns a timestamp
    /// of 0 (epoch) rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
