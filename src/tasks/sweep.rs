//! Sweep Tick Task
//!
//! Foreground operations already trigger sweeps; this task makes sure an idle
//! server still reclaims expired rows. It goes through the same gate, so it
//! never sweeps more often than the configured interval.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns a background task that runs the sweep check every `tick`.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_sweep_task(store.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_sweep_task(cache: CacheStore, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting sweep tick task with interval of {:?}", tick);

        loop {
            tokio::time::sleep(tick).await;

            if cache.maybe_sweep() {
                debug!("Sweep tick started an expired row sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryOptions, StoreOptions};
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_task_removes_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool =
            CacheStore::build_pool(&dir.path().join("cache.db"), 4, Duration::from_secs(5)).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let store =
            CacheStore::with_clock(pool, StoreOptions::default(), clock.clone()).unwrap();
        store.provision().unwrap();

        // The first set starts the initial sweep; the gate is now closed
        store
            .set(
                "expire_soon",
                b"value",
                &EntryOptions::new().with_absolute_relative_to_now(Duration::from_secs(1)),
            )
            .unwrap();

        // Move past both the entry's expiry and the sweep interval
        clock.advance(Duration::from_secs(2 * 30 * 60));

        let handle = spawn_sweep_task(store.clone(), Duration::from_millis(20));

        let mut removed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.inspect("expire_soon").unwrap().is_none() {
                removed = true;
                break;
            }
        }
        handle.abort();

        assert!(removed, "Expired row should have been swept");
        assert!(store.stats().sweeps >= 1);
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let pool =
            CacheStore::build_pool(&dir.path().join("cache.db"), 2, Duration::from_secs(5)).unwrap();
        let store = CacheStore::with_clock(
            pool,
            StoreOptions::default(),
            Arc::new(ManualClock::default()),
        )
        .unwrap();

        let handle = spawn_sweep_task(store, Duration::from_secs(1));

        // Abort immediately
        handle.abort();

        // Wait a bit and verify task is finished
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
