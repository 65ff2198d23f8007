//! SQL Cache - A distributed cache and session store backed by one SQL table
//!
//! Provides sliding and absolute expiration, read-time extension of sliding
//! entries and background sweeping of expired rows.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheStore, EntryOptions, ExpirationPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
