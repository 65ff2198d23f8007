//! Expiration Policy Module
//!
//! Pure computation of the expiry timestamp persisted with each row.
//!
//! Sliding expirations are stored as `now + multiplier * sliding` rather than
//! `now + sliding`. A read only re-persists the row once less than one sliding
//! window remains, so most reads never write.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::entry::{is_storable, truncate_to_ticks};
use crate::error::{CacheError, Result};

// == Entry Options ==
/// Caller-supplied expiration inputs for a `set`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Minimum time an unaccessed entry stays alive.
    pub sliding_expiration: Option<Duration>,
    /// Point in time after which the entry is never valid.
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// Absolute expiration expressed relative to the time of the `set`.
    /// Takes precedence over `absolute_expiration`.
    pub absolute_expiration_relative_to_now: Option<Duration>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sliding(mut self, sliding: Duration) -> Self {
        self.sliding_expiration = Some(sliding);
        self
    }

    pub fn with_absolute(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    pub fn with_absolute_relative_to_now(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }
}

// == Expiry Plan ==
/// What gets persisted for an entry: the authoritative expiry plus the
/// inputs needed to extend it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPlan {
    pub expires_at: DateTime<Utc>,
    pub sliding: Option<Duration>,
    pub absolute: Option<DateTime<Utc>>,
}

// == Expiration Policy ==
/// Parameters of the expiry computation.
///
/// Two named variants exist: [`ExpirationPolicy::CACHE`] and
/// [`ExpirationPolicy::SESSION`]. Session workloads are read less often, so
/// the stored window is wider and absolute bounds are not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    multiplier: u32,
    supports_absolute_cap: bool,
}

impl ExpirationPolicy {
    pub const CACHE: Self = Self::new(2, true);
    pub const SESSION: Self = Self::new(3, false);

    pub const fn new(multiplier: u32, supports_absolute_cap: bool) -> Self {
        Self {
            multiplier,
            supports_absolute_cap,
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn supports_absolute_cap(&self) -> bool {
        self.supports_absolute_cap
    }

    // == Compute Expiry ==
    /// Computes the expiry to persist for a `set` at `now`.
    ///
    /// # Errors
    /// - `InvalidExpiration` if the absolute bound is not after `now`
    /// - `MissingExpirationPolicy` if neither sliding nor absolute is given
    /// - `InvalidRequest` for zero or out-of-range durations, or an absolute
    ///   bound handed to a policy that does not support one
    pub fn compute_expiry(&self, now: DateTime<Utc>, options: &EntryOptions) -> Result<ExpiryPlan> {
        let has_absolute = options.absolute_expiration.is_some()
            || options.absolute_expiration_relative_to_now.is_some();
        if has_absolute && !self.supports_absolute_cap {
            return Err(CacheError::InvalidRequest(
                "absolute expiration is not supported by this policy".to_string(),
            ));
        }

        let absolute = match options.absolute_expiration_relative_to_now {
            Some(relative) => {
                if relative.is_zero() {
                    return Err(CacheError::InvalidRequest(
                        "relative absolute expiration must be positive".to_string(),
                    ));
                }
                Some(add_duration(now, relative)?)
            }
            None => options.absolute_expiration,
        };

        if let Some(absolute) = absolute {
            if absolute <= now {
                return Err(CacheError::InvalidExpiration);
            }
            if !is_storable(absolute) {
                return Err(out_of_range());
            }
        }

        // Only whole ticks are persisted; compute with what will be read back
        let sliding = options.sliding_expiration.map(truncate_to_ticks);

        let expires_at = match (sliding, absolute) {
            (None, None) => return Err(CacheError::MissingExpirationPolicy),
            (Some(sliding), _) => {
                if sliding.is_zero() {
                    return Err(CacheError::InvalidRequest(
                        "sliding expiration must be positive".to_string(),
                    ));
                }
                self.extended_expiry(now, sliding, absolute)?
            }
            (None, Some(absolute)) => absolute,
        };

        Ok(ExpiryPlan {
            expires_at,
            sliding,
            absolute,
        })
    }

    // == Extended Expiry ==
    /// Sliding candidate for `now`, capped at `absolute`.
    ///
    /// Used both when writing and when a read re-extends a stored row. No
    /// validation happens here: a stored cap may legitimately equal `now`.
    pub fn extended_expiry(
        &self,
        now: DateTime<Utc>,
        sliding: Duration,
        absolute: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        let candidate = sliding
            .checked_mul(self.multiplier)
            .ok_or_else(out_of_range)
            .and_then(|window| add_duration(now, window));

        // A candidate past the storable range is still fine when capped
        match (candidate, absolute) {
            (Ok(candidate), Some(cap)) if candidate > cap => Ok(cap),
            (Ok(candidate), _) => Ok(candidate),
            (Err(_), Some(cap)) => Ok(cap),
            (Err(e), None) => Err(e),
        }
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::CACHE
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::CACHE => write!(f, "cache"),
            Self::SESSION => write!(f, "session"),
            other => write!(
                f,
                "custom(x{}, absolute_cap={})",
                other.multiplier, other.supports_absolute_cap
            ),
        }
    }
}

impl FromStr for ExpirationPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" => Ok(Self::CACHE),
            "session" => Ok(Self::SESSION),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown expiration policy '{other}' (expected 'cache' or 'session')"
            ))),
        }
    }
}

// == Helpers ==
fn add_duration(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .filter(|&sum| is_storable(sum))
        .ok_or_else(out_of_range)
}

fn out_of_range() -> CacheError {
    CacheError::InvalidRequest("expiration is out of the representable range".to_string())
}
