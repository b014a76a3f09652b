//! 64-bit directory "large integer" values.
//!
//! Directories hand these out as two signed 32-bit halves. When the low half
//! reads as negative the high half has been under-counted by one, so
//! reconstruction adds it back before combining:
//!
//! ```text
//! value = (high + (low < 0 ? 1 : 0)) * 2^32 + low
//! ```
//!
//! Timestamps such as `accountExpires` are FILETIME tick counts: 100ns
//! intervals since 1601-01-01 UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// FILETIME ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Largest tick count that still fits [`max_timestamp`] (9999-12-31T23:59:59.9999999).
pub const MAX_TIMESTAMP_TICKS: i64 = 2_650_467_743_999_999_999;

/// The all-ones pattern directories use for "never expires".
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// A 64-bit value split into two signed 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LargeInteger {
    pub high: i32,
    pub low: i32,
}

impl LargeInteger {
    pub fn new(high: i32, low: i32) -> Self {
        Self { high, low }
    }

    /// Split a 64-bit value into halves the way the directory reports them.
    pub fn from_i64(value: i64) -> Self {
        Self {
            high: (value >> 32) as i32,
            low: value as i32,
        }
    }

    /// Reconstruct the 64-bit value, compensating for a negative low half.
    pub fn value(&self) -> i64 {
        let mut high = i64::from(self.high);
        if self.low < 0 {
            high += 1;
        }
        high.wrapping_mul(1_i64 << 32).wrapping_add(i64::from(self.low))
    }
}

impl From<i64> for LargeInteger {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl std::fmt::Display for LargeInteger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// The timestamp returned for values past the representable range.
pub fn max_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 999_999_900).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert a FILETIME tick count to a UTC timestamp.
///
/// Values past [`MAX_TIMESTAMP_TICKS`] (including [`NEVER_EXPIRES`]) return
/// [`max_timestamp`]. Negative tick counts are rejected.
pub fn filetime_to_datetime(attribute: &str, ticks: i64) -> DirectoryResult<DateTime<Utc>> {
    if ticks > MAX_TIMESTAMP_TICKS {
        return Ok(max_timestamp());
    }
    if ticks < 0 {
        return Err(DirectoryError::InvalidValue {
            attribute: attribute.to_string(),
            message: format!("{ticks} is not a valid FILETIME tick count"),
        });
    }

    let secs = ticks / TICKS_PER_SECOND - FILETIME_UNIX_OFFSET_SECS;
    let nanos = (ticks % TICKS_PER_SECOND) as u32 * 100;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| DirectoryError::InvalidValue {
        attribute: attribute.to_string(),
        message: format!("{ticks} is outside the supported timestamp range"),
    })
}
