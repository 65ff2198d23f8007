//! Cache Row Module
//!
//! The persisted shape of one cache entry, and the encodings used for its
//! timestamp and duration columns.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::{CacheError, Result};

/// Nanoseconds per persisted duration tick.
const NANOS_PER_TICK: u128 = 100;

/// 9999-12-31T23:59:59.999999Z, the last instant with a four-digit year.
const MAX_STORABLE_MICROS: i64 = 253_402_300_799_999_999;

// == Cache Row ==
/// One row of the cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    /// Caller-supplied key
    pub id: String,
    /// Opaque payload
    pub value: Vec<u8>,
    /// Instant after which the row is considered expired
    pub expires_at: DateTime<Utc>,
    /// Sliding window, present only for sliding entries
    pub sliding: Option<Duration>,
    /// Upper bound that extensions never cross
    pub absolute: Option<DateTime<Utc>>,
}

impl CacheRow {
    // == Is Expired ==
    /// A row is alive while `now <= expires_at`, matching the
    /// `ExpiresAtTime >= now` predicate used by reads.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    // == Needs Extension ==
    /// Returns true once less than one sliding window remains.
    ///
    /// Rows without a sliding window are never extended, even when an
    /// absolute bound is close.
    pub fn needs_extension(&self, now: DateTime<Utc>) -> bool {
        let Some(sliding) = self.sliding else {
            return false;
        };
        match TimeDelta::from_std(sliding)
            .ok()
            .and_then(|window| self.expires_at.checked_sub_signed(window))
        {
            Some(threshold) => now >= threshold,
            None => true,
        }
    }
}

// == Timestamp Encoding ==
/// Encodes a timestamp as fixed-width RFC 3339 text in UTC.
///
/// Every value has the same width and offset, so SQL text comparison orders
/// timestamps chronologically.
pub fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decodes a timestamp written by [`encode_timestamp`].
pub fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CacheError::InvalidData(format!("bad timestamp '{text}': {e}")))
}

/// Returns true if `at` encodes to fixed-width text. Later years gain a sign
/// and extra digits, which breaks text ordering in SQL.
pub fn is_storable(at: DateTime<Utc>) -> bool {
    (0..=MAX_STORABLE_MICROS).contains(&at.timestamp_micros())
}

/// Truncates a timestamp to the precision that survives a round trip
/// through the table.
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

// == Duration Encoding ==
/// Converts a duration to 100 ns ticks, saturating at `i64::MAX`.
pub fn duration_to_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / NANOS_PER_TICK).unwrap_or(i64::MAX)
}

/// Drops the part of `duration` below one tick, so the window used when
/// writing equals the one read back later.
pub fn truncate_to_ticks(duration: Duration) -> Duration {
    let nanos = duration.subsec_nanos();
    Duration::new(duration.as_secs(), nanos - nanos % NANOS_PER_TICK as u32)
}

/// Converts persisted ticks back into a duration.
pub fn ticks_to_duration(ticks: i64) -> Result<Duration> {
    let ticks = u64::try_from(ticks)
        .map_err(|_| CacheError::InvalidData(format!("negative sliding ticks: {ticks}")))?;
    let nanos = u128::from(ticks) * NANOS_PER_TICK;
    let secs = u64::try_from(nanos / 1_000_000_000)
        .map_err(|_| CacheError::InvalidData(format!("sliding ticks out of range: {ticks}")))?;
    // Remainder is always below one second
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}
