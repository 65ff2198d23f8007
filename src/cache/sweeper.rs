//! Expiry Sweeper
//!
//! Rate-limited, detached deletion of expired rows. Foreground operations
//! call [`ExpirySweeper::maybe_sweep`] on every request; at most one sweep per
//! interval is started (modulo benign races between callers).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::error::{CacheError, Result};

/// Sweeps may not be scheduled more often than this.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

const NEVER: i64 = i64::MIN;

// == Expiry Sweeper ==
/// Gate deciding when the next sweep is due.
///
/// The last sweep time is a plain atomic: two callers may both decide to
/// sweep, which is harmless because deleting expired rows is idempotent.
#[derive(Debug)]
pub struct ExpirySweeper {
    interval: Duration,
    interval_micros: i64,
    last_sweep: AtomicI64,
}

impl ExpirySweeper {
    // == Constructor ==
    /// Creates a sweeper that has never run.
    ///
    /// # Errors
    /// `InvalidConfig` if `interval` is below [`MIN_SWEEP_INTERVAL`].
    pub fn new(interval: Duration) -> Result<Self> {
        if interval < MIN_SWEEP_INTERVAL {
            return Err(CacheError::InvalidConfig(format!(
                "sweep interval {:?} is below the minimum of {:?}",
                interval, MIN_SWEEP_INTERVAL
            )));
        }

        Ok(Self {
            interval,
            interval_micros: i64::try_from(interval.as_micros()).unwrap_or(i64::MAX),
            last_sweep: AtomicI64::new(NEVER),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time the last sweep was started, if any.
    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        match self.last_sweep.load(Ordering::Acquire) {
            NEVER => None,
            micros => DateTime::from_timestamp_micros(micros),
        }
    }

    // == Is Due ==
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sweep.load(Ordering::Acquire) {
            NEVER => true,
            last => now.timestamp_micros().saturating_sub(last) > self.interval_micros,
        }
    }

    // == Maybe Sweep ==
    /// Starts `purge` off the calling thread if a sweep is due.
    ///
    /// Returns true if a sweep was started. The outcome of `purge` is only
    /// logged; it never reaches the caller and is not retried.
    pub fn maybe_sweep<F>(&self, now: DateTime<Utc>, purge: F) -> bool
    where
        F: FnOnce() -> Result<usize> + Send + 'static,
    {
        if !self.is_due(now) {
            return false;
        }

        self.last_sweep
            .store(now.timestamp_micros(), Ordering::Release);
        debug!("Starting expired row sweep at {}", now);
        spawn_detached(purge);
        true
    }
}

/// Runs the sweep on tokio's blocking pool when inside a runtime, otherwise
/// on a dedicated thread.
fn spawn_detached<F>(purge: F)
where
    F: FnOnce() -> Result<usize> + Send + 'static,
{
    let task = move || match purge() {
        Ok(0) => debug!("Expired row sweep: nothing to remove"),
        Ok(removed) => info!("Expired row sweep: removed {} rows", removed),
        Err(e) => error!("Expired row sweep failed: {}", e),
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(task);
        }
        Err(_) => {
            if let Err(e) = std::thread::Builder::new()
                .name("sql-cache-sweep".to_string())
                .spawn(task)
            {
                error!("Failed to start expired row sweep: {}", e);
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn counting_purge(
        runs: &Arc<AtomicUsize>,
        done: &mpsc::Sender<()>,
    ) -> impl FnOnce() -> Result<usize> + Send + 'static {
        let runs = runs.clone();
        let done = done.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            let _ = done.send(());
            Ok(3)
        }
    }

    #[test]
    fn test_interval_floor_enforced() {
        assert!(matches!(
            ExpirySweeper::new(Duration::from_secs(59)),
            Err(CacheError::InvalidConfig(_))
        ));
        assert!(ExpirySweeper::new(MIN_SWEEP_INTERVAL).is_ok());
    }

    #[test]
    fn test_first_call_is_due() {
        let sweeper = ExpirySweeper::new(DEFAULT_SWEEP_INTERVAL).unwrap();
        assert!(sweeper.last_sweep().is_none());
        assert!(sweeper.is_due(t0()));
    }

    #[test]
    fn test_sweep_gate_timing() {
        let interval = Duration::from_secs(300);
        let sweeper = ExpirySweeper::new(interval).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        assert!(sweeper.maybe_sweep(t0(), counting_purge(&runs, &tx)));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sweeper.last_sweep(), Some(t0()));

        let half = t0() + TimeDelta::seconds(150);
        assert!(!sweeper.maybe_sweep(half, counting_purge(&runs, &tx)));

        let exactly = t0() + TimeDelta::seconds(300);
        assert!(!sweeper.maybe_sweep(exactly, counting_purge(&runs, &tx)));

        let twice = t0() + TimeDelta::seconds(600);
        assert!(sweeper.maybe_sweep(twice, counting_purge(&runs, &tx)));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_sweep_is_swallowed() {
        let sweeper = ExpirySweeper::new(DEFAULT_SWEEP_INTERVAL).unwrap();
        let (tx, rx) = mpsc::channel();

        let started = sweeper.maybe_sweep(t0(), move || {
            let _ = tx.send(());
            Err(CacheError::StoreUnavailable("connection refused".to_string()))
        });

        assert!(started);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Not retried until the interval elapses
        assert!(!sweeper.is_due(t0() + TimeDelta::seconds(1)));
    }

    #[tokio::test]
    async fn test_sweep_runs_on_blocking_pool_inside_runtime() {
        let sweeper = ExpirySweeper::new(DEFAULT_SWEEP_INTERVAL).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        assert!(sweeper.maybe_sweep(t0(), counting_purge(&runs, &tx)));

        tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
