//! Request DTOs for the cache server API
//!
//! The value of a SET travels as the raw request body; its expiration policy
//! travels in the query string.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cache::{EntryOptions, MAX_ID_LENGTH};

/// Query parameters for the SET operation (PUT /set/:key)
///
/// # Fields
/// - `sliding`: Sliding expiration in seconds
/// - `absolute`: Absolute expiration as an RFC 3339 timestamp
/// - `ttl`: Absolute expiration in seconds from now
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetParams {
    #[serde(default)]
    pub sliding: Option<u64>,
    #[serde(default)]
    pub absolute: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetParams {
    /// Converts the query into store entry options. Which combinations are
    /// acceptable is decided by the store's expiration policy.
    pub fn to_options(&self) -> EntryOptions {
        EntryOptions {
            sliding_expiration: self.sliding.map(Duration::from_secs),
            absolute_expiration: self.absolute,
            absolute_expiration_relative_to_now: self.ttl.map(Duration::from_secs),
        }
    }
}

/// Validates a key taken from the request path.
///
/// Returns an error message if validation fails, None if valid.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.chars().count() > MAX_ID_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        ));
    }
    None
}
