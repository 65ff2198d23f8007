//! Cache Module
//!
//! SQL-table-backed cache with sliding and absolute expiration, read-time
//! extension and background sweeping of expired rows.

mod entry;
mod policy;
mod schema;
mod stats;
mod store;
mod sweeper;


// Re-export public types
pub use entry::{decode_timestamp, encode_timestamp, CacheRow};
pub use policy::{EntryOptions, ExpirationPolicy, ExpiryPlan};
pub use schema::{quote_identifier, ColumnOrdinals, RowSchema, MAX_ID_LENGTH};
pub use stats::{CacheStats, StatsRecorder};
pub use store::{CacheStore, SqlitePool, StoreOptions};
pub use sweeper::{ExpirySweeper, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
