//! Ingest queue and filter pipeline: the write path from `ingest()` through
//! to a persisted `readings` batch.
//!
//! The drain thread blocks on the queue's condvar; a separate stats thread
//! blocks on its own. The queue lock and the pipeline lock are never held at
//! the same time — each thread takes at most one of the two at once.

pub mod error;
mod pipeline;
mod queue;
mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

pub use error::{FilterError, IngestError};
pub use pipeline::FilterStage;

use pipeline::Pipeline;
use queue::IngestQueue;
use stats::StatsTracker;

use crate::model::Reading;
use crate::storage::StorageEngine;

pub struct IngestService {
    queue: Arc<IngestQueue>,
    pipeline: Arc<Pipeline>,
    stats: Arc<StatsTracker>,
    running: Arc<AtomicBool>,
    drain_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    stats_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl IngestService {
    /// Spawns the drain and stats-flush threads. `runtime` is the tokio
    /// handle the OS threads use to call back into the async storage layer.
    pub fn start(
        threshold: usize,
        drain_timeout: Duration,
        stats_interval: Duration,
        storage: Arc<StorageEngine>,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(IngestQueue::new(threshold, drain_timeout, running.clone()));
        let pipeline = Arc::new(Pipeline::empty());
        let stats = Arc::new(StatsTracker::new());

        let stats_handle = stats::spawn_stats_flush_thread(
            stats.clone(),
            storage.clone(),
            runtime.clone(),
            stats_interval,
            running.clone(),
        );

        let drain_handle = {
            let queue = queue.clone();
            let pipeline = pipeline.clone();
            let stats = stats.clone();
            let storage = storage.clone();
            let running = running.clone();
            let runtime = runtime.clone();
            std::thread::spawn(move || {
                loop {
                    let (batch, still_running) = queue.wait_and_swap();
                    if !batch.is_empty() {
                        drain_batch(&pipeline, &stats, &storage, &runtime, batch);
                    }
                    if !still_running {
                        break;
                    }
                }
                // Final drain on shutdown: the condvar may have woken us with
                // `running == false` but a non-empty queue still pending.
                let (batch, _) = queue.wait_and_swap();
                if !batch.is_empty() {
                    drain_batch(&pipeline, &stats, &storage, &runtime, batch);
                }
            })
        };

        Arc::new(Self {
            queue,
            pipeline,
            stats,
            running,
            drain_handle: Mutex::new(Some(drain_handle)),
            stats_handle: Mutex::new(Some(stats_handle)),
        })
    }

    pub fn ingest(&self, reading: Reading) -> Result<(), IngestError> {
        self.queue.ingest(reading)
    }

    pub fn ingest_many(&self, readings: Vec<Reading>) -> Result<(), IngestError> {
        self.queue.ingest_many(readings)
    }

    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    pub fn discarded_count(&self) -> u64 {
        self.queue.discarded_count() + self.stats.discarded()
    }

    pub fn global_readings(&self) -> u64 {
        self.stats.global_readings()
    }

    /// Installs a new filter stage chain. Holds `pipelineMutex` for the
    /// whole operation: first fully drains the queue through the OLD
    /// pipeline (repeatedly taking and releasing `qMutex`), then swaps in
    /// the new stages. `qMutex` and `pipelineMutex` are never held at once.
    pub fn config_change(
        &self,
        new_stages: Vec<Box<dyn FilterStage>>,
        storage: &Arc<StorageEngine>,
        runtime: &tokio::runtime::Handle,
    ) {
        loop {
            let batch = self.queue.drain_now();
            if batch.is_empty() {
                break;
            }
            drain_batch(&self.pipeline, &self.stats, storage, runtime, batch);
        }
        self.pipeline.reconfigure(new_stages);
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.wake_for_shutdown();
        self.stats.wake_for_shutdown();
        if let Some(handle) = self.drain_handle.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stats_handle.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn drain_batch(
    pipeline: &Pipeline,
    stats: &StatsTracker,
    storage: &StorageEngine,
    runtime: &tokio::runtime::Handle,
    batch: Vec<Reading>,
) {
    let filtered = match pipeline.apply(batch) {
        Ok(readings) => readings,
        Err(err) => {
            tracing::error!(error = %err, "filter pipeline rejected batch, discarding");
            return;
        }
    };
    if filtered.is_empty() {
        return;
    }
    let mut per_asset: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for reading in &filtered {
        *per_asset.entry(reading.asset_code.clone()).or_insert(0) += 1;
    }
    let payload = build_append_payload(&filtered);
    match runtime.block_on(storage.append_readings(&payload)) {
        Ok(_) => {
            for (asset_code, count) in per_asset {
                stats.record_success(&asset_code, count);
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to persist ingest batch");
            stats.record_discard(filtered.len() as u64);
        }
    }
}

fn build_append_payload(readings: &[Reading]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = readings
        .iter()
        .map(|r| {
            let reading_obj: serde_json::Map<String, serde_json::Value> = r
                .datapoints()
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::Value::from(value.clone())))
                .collect();
            json!({
                "asset_code": r.asset_code,
                "user_ts": r.user_ts,
                "read_key": r.read_key,
                "reading": reading_obj,
            })
        })
        .collect();
    json!({ "readings": rows })
}
