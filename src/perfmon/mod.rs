//! Performance monitor: per-counter min/avg/max aggregation with a periodic
//! flush through the storage engine.
//!
//! `collecting` is a relaxed atomic so the enabled/disabled fast path never
//! takes a lock on the producer side. The housekeeper loop uses
//! `tokio::select!` between an interval tick and a shutdown watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::storage::StorageEngine;

#[derive(Debug, Clone, Copy)]
struct Sample {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Sample {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn average(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

/// Per-name `(count, sumForAverage, min, max)`, guarded by its own mutex so
/// the map-level lock is only held long enough to find-or-create the entry.
pub struct PerfMon(Mutex<Option<Sample>>);

impl PerfMon {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn record(&self, value: f64) {
        let mut guard = self.0.lock().expect("lock poisoned");
        match guard.as_mut() {
            Some(sample) => sample.record(value),
            None => *guard = Some(Sample::first(value)),
        }
    }

    /// Snapshots and resets, returning `None` if no samples arrived since
    /// the last flush.
    fn take(&self) -> Option<Sample> {
        self.0.lock().expect("lock poisoned").take()
    }
}

/// Registry of named monitors plus the no-op fast path toggle.
///
/// Lock ordering: the map-level mutex is always taken before any individual
/// monitor's mutex, and is released before the per-monitor lock is acquired.
pub struct PerfMonRegistry {
    collecting: AtomicBool,
    monitors: Mutex<HashMap<String, Arc<PerfMon>>>,
}

impl Default for PerfMonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfMonRegistry {
    pub fn new() -> Self {
        Self {
            collecting: AtomicBool::new(false),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Toggles the fast path; observable to concurrent producers without a
    /// lock.
    pub fn set_collecting(&self, enabled: bool) {
        self.collecting.store(enabled, Ordering::Relaxed);
    }

    /// No-op when disabled.
    pub fn collect(&self, name: &str, value: f64) {
        if !self.collecting.load(Ordering::Relaxed) {
            return;
        }
        let monitor = {
            let mut monitors = self.monitors.lock().expect("lock poisoned");
            monitors.entry(name.to_string()).or_insert_with(|| Arc::new(PerfMon::new())).clone()
        };
        monitor.record(value);
    }

    fn snapshot_and_reset(&self) -> Vec<(String, Sample)> {
        let monitors = self.monitors.lock().expect("lock poisoned");
        monitors
            .iter()
            .filter_map(|(name, monitor)| monitor.take().map(|s| (name.clone(), s)))
            .collect()
    }
}

/// Housekeeper task: on each tick, snapshots every monitor, resets it, and
/// batches an insert through the storage engine tagging `service_name`.
pub async fn housekeeper(
    registry: Arc<PerfMonRegistry>,
    storage: Arc<StorageEngine>,
    service_name: String,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                flush_once(&registry, &storage, &service_name).await;
                break;
            }
            _ = ticker.tick() => {
                flush_once(&registry, &storage, &service_name).await;
            }
        }
    }
}

async fn flush_once(registry: &PerfMonRegistry, storage: &StorageEngine, service_name: &str) {
    for (name, sample) in registry.snapshot_and_reset() {
        let row = serde_json::json!({
            "service": service_name,
            "name": name,
            "minimum": sample.min,
            "maximum": sample.max,
            "average": sample.average(),
            "samples": sample.count,
        });
        if let Err(err) = storage.insert("statistics_history", &row).await {
            tracing::error!(error = %err, monitor = name.as_str(), "failed to flush performance sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_is_a_no_op_when_disabled() {
        let registry = PerfMonRegistry::new();
        registry.collect("x", 1.0);
        assert!(registry.snapshot_and_reset().is_empty());
    }

    #[test]
    fn collect_aggregates_min_avg_max() {
        let registry = PerfMonRegistry::new();
        registry.set_collecting(true);
        registry.collect("x", 1.0);
        registry.collect("x", 5.0);
        registry.collect("x", 3.0);
        let snapshot = registry.snapshot_and_reset();
        let (_, sample) = snapshot.into_iter().find(|(n, _)| n == "x").unwrap();
        assert_eq!(sample.count, 3);
        assert_eq!(sample.min, 1.0);
        assert_eq!(sample.max, 5.0);
        assert!((sample.average() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_resets_the_monitor() {
        let registry = PerfMonRegistry::new();
        registry.set_collecting(true);
        registry.collect("x", 1.0);
        assert_eq!(registry.snapshot_and_reset().len(), 1);
        assert!(registry.snapshot_and_reset().is_empty());
    }
}
