//! Filter pipeline: a typed chain of stages run in registration order. Any
//! stage may shrink, reorder, or reject the batch it's given.

use std::sync::Mutex;

use crate::ingest::error::FilterError;
use crate::model::Reading;

pub trait FilterStage: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&mut self, readings: Vec<Reading>) -> Result<Vec<Reading>, FilterError>;
}

/// Holds the active stage chain behind a single mutex; `reconfigure` swaps
/// the whole chain rather than mutating it stage-by-stage, so a drain in
/// progress always sees either the old chain or the new one, never a mix.
pub struct Pipeline {
    stages: Mutex<Vec<Box<dyn FilterStage>>>,
}

impl Pipeline {
    pub fn empty() -> Self {
        Self { stages: Mutex::new(Vec::new()) }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.lock().expect("lock poisoned").is_empty()
    }

    pub fn apply(&self, mut readings: Vec<Reading>) -> Result<Vec<Reading>, FilterError> {
        let mut stages = self.stages.lock().expect("lock poisoned");
        for stage in stages.iter_mut() {
            if readings.is_empty() {
                break;
            }
            readings = stage.apply(readings).map_err(|e| {
                tracing::warn!(stage = stage.name(), error = %e, "filter stage rejected batch");
                e
            })?;
        }
        Ok(readings)
    }

    /// Installs a new stage chain, dropping the old stages in reverse
    /// registration order (mirroring teardown order of a "next callback"
    /// chain).
    pub fn reconfigure(&self, new_stages: Vec<Box<dyn FilterStage>>) {
        let mut stages = self.stages.lock().expect("lock poisoned");
        while stages.pop().is_some() {}
        *stages = new_stages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    struct DropEven;
    impl FilterStage for DropEven {
        fn name(&self) -> &str {
            "drop_even"
        }
        fn apply(&mut self, readings: Vec<Reading>) -> Result<Vec<Reading>, FilterError> {
            Ok(readings.into_iter().enumerate().filter(|(i, _)| i % 2 == 1).map(|(_, r)| r).collect())
        }
    }

    struct RejectAll;
    impl FilterStage for RejectAll {
        fn name(&self) -> &str {
            "reject_all"
        }
        fn apply(&mut self, _readings: Vec<Reading>) -> Result<Vec<Reading>, FilterError> {
            Err(FilterError::Rejected("always rejects".into()))
        }
    }

    fn reading(n: i64) -> Reading {
        Reading::new("A1", "2024-01-02 03:04:05.000000+00:00", vec![("n".into(), Value::Integer(n))]).unwrap()
    }

    #[test]
    fn empty_pipeline_passes_through() {
        let pipeline = Pipeline::empty();
        let out = pipeline.apply(vec![reading(1), reading(2)]).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stage_can_shrink_batch() {
        let pipeline = Pipeline::empty();
        pipeline.reconfigure(vec![Box::new(DropEven)]);
        let out = pipeline.apply(vec![reading(1), reading(2), reading(3), reading(4)]).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stage_can_reject_batch() {
        let pipeline = Pipeline::empty();
        pipeline.reconfigure(vec![Box::new(RejectAll)]);
        assert!(pipeline.apply(vec![reading(1)]).is_err());
    }

    #[test]
    fn reconfigure_replaces_the_whole_chain() {
        let pipeline = Pipeline::empty();
        pipeline.reconfigure(vec![Box::new(RejectAll)]);
        pipeline.reconfigure(vec![Box::new(DropEven)]);
        assert!(pipeline.apply(vec![reading(1), reading(2)]).is_ok());
    }
}
