//! Per-asset and global ingest counters, flushed to `asset_statistics` by a
//! dedicated OS thread on the same wake-or-deadline pattern as the drain
//! thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::storage::StorageEngine;

pub struct StatsTracker {
    counters: Mutex<std::collections::HashMap<String, u64>>,
    global_readings: AtomicU64,
    discarded: AtomicU64,
    pending: Mutex<bool>,
    cv: Condvar,
    known_assets: Mutex<HashSet<String>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(std::collections::HashMap::new()),
            global_readings: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            pending: Mutex::new(false),
            cv: Condvar::new(),
            known_assets: Mutex::new(HashSet::new()),
        }
    }

    pub fn record_success(&self, asset_code: &str, count: u64) {
        {
            let mut counters = self.counters.lock().expect("lock poisoned");
            *counters.entry(asset_code.to_string()).or_insert(0) += count;
        }
        self.global_readings.fetch_add(count, Ordering::Relaxed);
        let mut pending = self.pending.lock().expect("lock poisoned");
        *pending = true;
        self.cv.notify_one();
    }

    pub fn record_discard(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn global_readings(&self) -> u64 {
        self.global_readings.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn drain_counters(&self) -> std::collections::HashMap<String, u64> {
        let mut counters = self.counters.lock().expect("lock poisoned");
        std::mem::take(&mut *counters)
    }

    pub fn wake_for_shutdown(&self) {
        self.cv.notify_all();
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Ensures `asset_statistics` has a row for `asset_code`, creating one the
/// first time it's seen. Tolerates a duplicate-key race as benign since two
/// concurrent first-sight readings for the same asset are expected.
async fn ensure_asset_known(tracker: &StatsTracker, storage: &StorageEngine, asset_code: &str) {
    {
        let mut known = tracker.known_assets.lock().expect("lock poisoned");
        if known.contains(asset_code) {
            return;
        }
        known.insert(asset_code.to_string());
    }
    let row = json!({"asset_code": asset_code, "count": 0, "previous_value": 0, "ts": "now()"});
    if let Err(err) = storage.insert("asset_statistics", &row).await {
        tracing::debug!(asset_code, error = %err, "asset_statistics row already present");
    }
}

/// Spawns the OS thread that periodically flushes accumulated per-asset
/// counts as `count = count + delta` updates.
pub fn spawn_stats_flush_thread(
    tracker: Arc<StatsTracker>,
    storage: Arc<StorageEngine>,
    runtime: tokio::runtime::Handle,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            {
                let pending = tracker.pending.lock().expect("lock poisoned");
                let (mut pending, _) = tracker
                    .cv
                    .wait_timeout_while(pending, interval, |p| !*p && running.load(Ordering::Acquire))
                    .expect("lock poisoned");
                *pending = false;
            }
            if !running.load(Ordering::Acquire) {
                break;
            }
            flush_deltas(&tracker, &storage, &runtime);
        }
        // Final drain on shutdown: the condvar may have woken us with
        // `running == false` but accumulated deltas still pending.
        flush_deltas(&tracker, &storage, &runtime);
    })
}

fn flush_deltas(tracker: &StatsTracker, storage: &StorageEngine, runtime: &tokio::runtime::Handle) {
    for (asset_code, delta) in tracker.drain_counters() {
        runtime.block_on(ensure_asset_known(tracker, storage, &asset_code));
        let payload = json!({
            "expressions": [{"column": "count", "operator": "+", "value": delta}],
            "where": {"column": "asset_code", "condition": "=", "value": asset_code},
        });
        if let Err(err) = runtime.block_on(storage.update("asset_statistics", &payload)) {
            tracing::error!(asset_code, error = %err, "failed to flush asset statistics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_success_accumulates_per_asset_and_global() {
        let tracker = StatsTracker::new();
        tracker.record_success("A1", 3);
        tracker.record_success("A1", 2);
        tracker.record_success("A2", 1);
        assert_eq!(tracker.global_readings(), 6);
        let deltas = tracker.drain_counters();
        assert_eq!(deltas.get("A1"), Some(&5));
        assert_eq!(deltas.get("A2"), Some(&1));
    }

    #[test]
    fn drain_counters_resets_to_empty() {
        let tracker = StatsTracker::new();
        tracker.record_success("A1", 1);
        tracker.drain_counters();
        assert!(tracker.drain_counters().is_empty());
    }

    #[test]
    fn record_discard_is_independent_of_success() {
        let tracker = StatsTracker::new();
        tracker.record_discard(4);
        assert_eq!(tracker.discarded(), 4);
        assert_eq!(tracker.global_readings(), 0);
    }
}
