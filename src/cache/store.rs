//! Cache Store Module
//!
//! Get/Set/Remove/Refresh against the cache table. Expired rows are invisible
//! to reads even before the sweeper deletes them, and reads of sliding
//! entries push their expiry forward once less than one window remains.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, params, Connection, ErrorCode, ToSql};
use tracing::{debug, info, warn};

use crate::cache::entry::{duration_to_ticks, encode_timestamp, truncate_to_micros, CacheRow};
use crate::cache::policy::{EntryOptions, ExpirationPolicy};
use crate::cache::schema::RowSchema;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::cache::sweeper::{ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Connection pool over the SQLite database file.
pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

// == Store Options ==
/// Table binding and expiration behaviour of a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub table_name: String,
    pub schema_name: Option<String>,
    pub policy: ExpirationPolicy,
    pub sweep_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_name: "Cache".to_string(),
            schema_name: None,
            policy: ExpirationPolicy::CACHE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

// == Cache Store ==
/// Handle to the cache table. Cheap to clone; clones share the pool, the
/// sweep gate and the counters.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    pool: SqlitePool,
    schema: RowSchema,
    policy: ExpirationPolicy,
    sweeper: ExpirySweeper,
    clock: Arc<dyn Clock>,
    stats: StatsRecorder,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("table", &self.inner.schema.table_name())
            .field("policy", &self.inner.policy)
            .field("sweep_interval", &self.inner.sweeper.interval())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    // == Constructors ==
    /// Opens the database named by `config` with the system clock.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = Self::build_pool(
            &config.database_path,
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        Self::with_clock(pool, config.store_options()?, Arc::new(SystemClock))
    }

    /// Creates a store over an existing pool.
    pub fn with_clock(
        pool: SqlitePool,
        options: StoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let schema = RowSchema::new(&options.table_name, options.schema_name.as_deref())?;
        let sweeper = ExpirySweeper::new(options.sweep_interval)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                schema,
                policy: options.policy,
                sweeper,
                clock,
                stats: StatsRecorder::new(),
            }),
        })
    }

    /// Builds a connection pool for the SQLite file at `path`.
    ///
    /// Every pooled connection runs in WAL mode with `busy_timeout` applied,
    /// so concurrent single-statement writers wait instead of failing.
    pub fn build_pool(path: &Path, max_size: u32, busy_timeout: Duration) -> Result<SqlitePool> {
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        });

        let pool = r2d2::Pool::builder()
            .max_size(max_size)
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)?;

        info!("Connection pool opened at {:?} (max {} connections)", path, max_size);
        Ok(pool)
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.inner.policy
    }

    pub fn schema(&self) -> &RowSchema {
        &self.inner.schema
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    fn now(&self) -> DateTime<Utc> {
        truncate_to_micros(self.inner.clock.now())
    }

    // == Provision ==
    /// Creates the cache table and index if absent.
    pub fn provision(&self) -> Result<bool> {
        let conn = self.inner.pool.get()?;
        self.inner.schema.provision(&conn)
    }

    // == Connect ==
    /// Probes the store and primes the column ordinals.
    ///
    /// Failure is returned for the caller to log or report; the store stays
    /// usable and reads fall back to name-based column lookup.
    pub fn connect(&self) -> Result<()> {
        let result = self
            .inner
            .pool
            .get()
            .map_err(CacheError::from)
            .and_then(|conn| self.inner.schema.prime_ordinals(&conn));

        match result {
            Ok(ordinals) => {
                debug!("Connected to cache table, ordinals {:?}", ordinals);
                Ok(())
            }
            Err(e) => {
                warn!("Cache store probe failed: {}", e);
                Err(e)
            }
        }
    }

    // == Get ==
    /// Returns the value for `key` if a live row exists, extending its
    /// sliding expiry when due.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.now();
        let result = self.inner.read_and_extend(key, now);
        self.trigger_sweep(now);
        result
    }

    // == Set ==
    /// Stores `value` under `key`, replacing value and expiration of any
    /// existing row.
    pub fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()> {
        let now = self.now();
        let result = self.inner.upsert(key, value, options, now);
        self.trigger_sweep(now);
        result
    }

    // == Remove ==
    /// Deletes `key`. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        let now = self.now();
        let result = self.inner.delete(key);
        self.trigger_sweep(now);
        result
    }

    // == Refresh ==
    /// Extends a sliding entry as a read would, without returning its value.
    pub fn refresh(&self, key: &str) -> Result<()> {
        self.get(key).map(|_| ())
    }

    // == Inspect ==
    /// Reads the raw row for `key`, expired or not, without extending it.
    pub fn inspect(&self, key: &str) -> Result<Option<CacheRow>> {
        let conn = self.inner.pool.get()?;
        let mut stmt = conn.prepare_cached(self.inner.schema.select_by_id_sql())?;
        let mut rows = stmt.query(params![key])?;
        let row = match rows.next()? {
            Some(row) => Some(self.inner.schema.read_row(row)?),
            None => None,
        };
        Ok(row)
    }

    // == Sweep ==
    /// Deletes every expired row now, on the calling thread.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.now();
        self.inner.delete_expired(now)
    }

    /// Runs the sweep check outside a foreground call, so an idle store
    /// still reclaims rows. Returns true if a sweep was started.
    pub fn maybe_sweep(&self) -> bool {
        let now = self.now();
        self.trigger_sweep(now)
    }

    fn trigger_sweep(&self, now: DateTime<Utc>) -> bool {
        let inner = Arc::clone(&self.inner);
        self.inner.sweeper.maybe_sweep(now, move || {
            inner.stats.record_sweep();
            let removed = inner.delete_expired(now)?;
            inner.stats.record_swept_rows(removed);
            Ok(removed)
        })
    }

    // == Async Variants ==
    pub async fn connect_async(&self) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.connect()).await
    }

    pub async fn get_async(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.clone();
        let key = key.to_string();
        run_blocking(move || store.get(&key)).await
    }

    pub async fn set_async(&self, key: &str, value: Vec<u8>, options: EntryOptions) -> Result<()> {
        let store = self.clone();
        let key = key.to_string();
        run_blocking(move || store.set(&key, &value, &options)).await
    }

    pub async fn remove_async(&self, key: &str) -> Result<()> {
        let store = self.clone();
        let key = key.to_string();
        run_blocking(move || store.remove(&key)).await
    }

    pub async fn refresh_async(&self, key: &str) -> Result<()> {
        let store = self.clone();
        let key = key.to_string();
        run_blocking(move || store.refresh(&key)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Internal(format!("blocking task failed: {e}")))?
}

impl StoreInner {
    fn read_and_extend(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get()?;

        let row = {
            let mut stmt = conn.prepare_cached(self.schema.select_alive_sql())?;
            let mut rows = stmt.query(params![key, encode_timestamp(now)])?;
            let row = match rows.next()? {
                Some(row) => Some(self.schema.read_row(row)?),
                None => None,
            };
            row
        };

        let Some(row) = row else {
            self.stats.record_miss();
            return Ok(None);
        };
        self.stats.record_hit();

        if row.needs_extension(now) {
            self.extend(&conn, &row, now);
        }

        Ok(Some(row.value))
    }

    /// Moves the expiry of `row` forward. Never fails the surrounding read:
    /// the value has already been captured.
    fn extend(&self, conn: &Connection, row: &CacheRow, now: DateTime<Utc>) {
        let Some(sliding) = row.sliding else {
            return;
        };

        let extended = match self.policy.extended_expiry(now, sliding, row.absolute) {
            Ok(at) => truncate_to_micros(at),
            Err(e) => {
                warn!("Cannot extend expiry of {}: {}", row.id, e);
                return;
            }
        };
        if extended <= row.expires_at {
            return;
        }

        match conn.execute(
            self.schema.update_expiry_sql(),
            params![row.id, encode_timestamp(extended)],
        ) {
            Ok(0) => debug!("Row {} disappeared before its expiry was extended", row.id),
            Ok(_) => {
                self.stats.record_extension();
                debug!("Extended {} from {} to {}", row.id, row.expires_at, extended);
            }
            Err(e) => warn!("Failed to extend expiry of {}: {}", row.id, e),
        }
    }

    fn upsert(
        &self,
        key: &str,
        value: &[u8],
        options: &EntryOptions,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let plan = self.policy.compute_expiry(now, options)?;

        let expires_at = encode_timestamp(truncate_to_micros(plan.expires_at));
        let sliding = plan.sliding.map(duration_to_ticks);
        let absolute = plan
            .absolute
            .map(|at| encode_timestamp(truncate_to_micros(at)));
        let args: [&dyn ToSql; 5] = [&key, &value, &expires_at, &sliding, &absolute];

        let conn = self.pool.get()?;
        if conn.execute(self.schema.update_entry_sql(), &args[..])? > 0 {
            return Ok(());
        }
        self.insert_entry(&conn, key, &args[..])
    }

    /// Inserts a new row. A concurrent insert of the same key surfaces as a
    /// primary key violation; it is retried once as an update.
    fn insert_entry(&self, conn: &Connection, key: &str, args: &[&dyn ToSql]) -> Result<()> {
        match conn.execute(self.schema.insert_sql(), args) {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                debug!("Concurrent insert of {}; retrying as update", key);
                match conn.execute(self.schema.update_entry_sql(), args)? {
                    0 => Err(CacheError::Conflict(format!(
                        "key '{key}' was inserted and removed concurrently"
                    ))),
                    _ => Ok(()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let removed = conn.execute(self.schema.delete_by_id_sql(), params![key])?;
        debug!("Remove {}: {} row(s) deleted", key, removed);
        Ok(())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.pool.get()?;
        let removed = conn.execute(self.schema.delete_expired_sql(), params![encode_timestamp(now)])?;
        Ok(removed)
    }
}

fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}
