//! Cache Statistics Module
//!
//! Tracks store activity: hits, misses, read-time extensions and sweeps.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found a live row
    pub hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Reads that pushed a row's expiry forward
    pub extensions: u64,
    /// Sweeps started
    pub sweeps: u64,
    /// Rows deleted by sweeps
    pub swept_rows: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by foreground calls and sweeps.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    extensions: AtomicU64,
    sweeps: AtomicU64,
    swept_rows: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extension(&self) {
        self.extensions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept_rows(&self, rows: usize) {
        self.swept_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            extensions: self.extensions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            swept_rows: self.swept_rows.load(Ordering::Relaxed),
        }
    }
}
