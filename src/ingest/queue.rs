//! Producer queue with a size-threshold-or-deadline drain wake.
//!
//! `queue` is the only cross-thread mutable structure here; it's always
//! swapped out wholesale and handed to the drain thread rather than
//! iterated under lock, so the lock is only ever held for a `mem::take`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::error::IngestError;
use crate::model::Reading;

pub(super) struct QueueState {
    pub(super) queue: Vec<Reading>,
}

pub struct IngestQueue {
    pub(super) inner: Mutex<QueueState>,
    pub(super) cv: Condvar,
    threshold: usize,
    timeout: Duration,
    running: Arc<AtomicBool>,
    discarded: AtomicU64,
}

impl IngestQueue {
    pub fn new(threshold: usize, timeout: Duration, running: Arc<AtomicBool>) -> Self {
        Self {
            inner: Mutex::new(QueueState { queue: Vec::new() }),
            cv: Condvar::new(),
            threshold,
            timeout,
            running,
            discarded: AtomicU64::new(0),
        }
    }

    /// Fails fast once shutdown is in progress; the reading is counted in
    /// `discarded_count` rather than queued.
    pub fn ingest(&self, reading: Reading) -> Result<(), IngestError> {
        self.ingest_many(vec![reading])
    }

    pub fn ingest_many(&self, readings: Vec<Reading>) -> Result<(), IngestError> {
        if readings.is_empty() {
            return Ok(());
        }
        if !self.running.load(Ordering::Acquire) {
            self.discarded.fetch_add(readings.len() as u64, Ordering::Relaxed);
            return Err(IngestError::Shutdown);
        }
        let size = {
            let mut guard = self.inner.lock().expect("lock poisoned");
            guard.queue.extend(readings);
            guard.queue.len()
        };
        if size >= self.threshold {
            self.cv.notify_one();
        }
        Ok(())
    }

    /// Observational estimate; does not block producers.
    pub fn queue_length(&self) -> usize {
        self.inner.lock().expect("lock poisoned").queue.len()
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn wake_for_shutdown(&self) {
        self.cv.notify_all();
    }

    /// Swaps in a fresh empty buffer immediately, without waiting for the
    /// threshold or deadline. Used by `config_change` to fully drain the
    /// queue under the old pipeline before installing a new one.
    pub(super) fn drain_now(&self) -> Vec<Reading> {
        let mut guard = self.inner.lock().expect("lock poisoned");
        std::mem::take(&mut guard.queue)
    }

    /// Blocks the calling (drain) thread until the queue reaches
    /// `threshold`, the deadline elapses, or shutdown is signalled; then
    /// swaps in a fresh empty buffer and returns the drained data plus
    /// whether the service is still running.
    pub(super) fn wait_and_swap(&self) -> (Vec<Reading>, bool) {
        let guard = self.inner.lock().expect("lock poisoned");
        let (mut guard, _) = self
            .cv
            .wait_timeout_while(guard, self.timeout, |state| {
                state.queue.len() < self.threshold && self.running.load(Ordering::Acquire)
            })
            .expect("lock poisoned");
        let data = std::mem::take(&mut guard.queue);
        drop(guard);
        (data, self.running.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn reading(n: i64) -> Reading {
        Reading::new("A1", "2024-01-02 03:04:05.000000+00:00", vec![("n".into(), Value::Integer(n))]).unwrap()
    }

    #[test]
    fn ingest_after_shutdown_is_discarded() {
        let running = Arc::new(AtomicBool::new(true));
        let q = IngestQueue::new(10, Duration::from_millis(50), running.clone());
        running.store(false, Ordering::Release);
        assert!(matches!(q.ingest(reading(1)), Err(IngestError::Shutdown)));
        assert_eq!(q.discarded_count(), 1);
        assert_eq!(q.queue_length(), 0);
    }

    #[test]
    fn wait_and_swap_wakes_on_threshold() {
        let running = Arc::new(AtomicBool::new(true));
        let q = Arc::new(IngestQueue::new(2, Duration::from_secs(5), running));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.wait_and_swap());
        std::thread::sleep(Duration::from_millis(20));
        q.ingest(reading(1)).unwrap();
        q.ingest(reading(2)).unwrap();
        let (data, running) = handle.join().unwrap();
        assert_eq!(data.len(), 2);
        assert!(running);
    }
}
