//! ControlStore in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use codemend_core::store::{ControlStore, StepTransition, StoreError};
use codemend_core::types::{Job, Step, StepState};

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    steps: HashMap<String, Step>,
}

/// In-memory implementation for development and testing.
///
/// A single mutex over the whole state gives the same atomicity the
/// PostgreSQL implementation gets from row locks: a claim observes and
/// mutates the step in one critical section, so concurrent claimers can
/// never receive the same row.
pub struct InMemoryControlStore {
    inner: Mutex<State>,
}

impl InMemoryControlStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryControlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlStore for InMemoryControlStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        if !state.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(job.id.clone()));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.lock().jobs.get(job_id).cloned())
    }

    async fn insert_step(&self, step: &Step) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.steps.insert(step.id.clone(), step.clone());
        Ok(())
    }

    async fn fetch_step(&self, step_id: &str) -> Result<Option<Step>, StoreError> {
        Ok(self.inner.lock().steps.get(step_id).cloned())
    }

    async fn steps_for_job(&self, job_id: &str) -> Result<Vec<Step>, StoreError> {
        let state = self.inner.lock();
        let mut steps: Vec<Step> = state
            .steps
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(steps)
    }

    async fn claim_next_pending(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Step>, StoreError> {
        let mut state = self.inner.lock();
        let mut candidate: Option<(DateTime<Utc>, String)> = None;
        for step in state.steps.values() {
            if step.state != StepState::Pending {
                continue;
            }
            let key = (step.created_at, step.id.clone());
            let replace = match &candidate {
                Some(best) => key < *best,
                None => true,
            };
            if replace {
                candidate = Some(key);
            }
        }
        let Some((_, id)) = candidate else {
            return Ok(None);
        };
        let step = state
            .steps
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        step.begin(worker_id, now);
        Ok(Some(step.clone()))
    }

    async fn running_stalled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError> {
        let state = self.inner.lock();
        Ok(state
            .steps
            .values()
            .filter(|s| {
                s.state == StepState::Running
                    && s.heartbeat_at.map(|hb| hb < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn commit_transition(&self, transition: &StepTransition) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        if let Some(step) = &transition.step {
            if !state.steps.contains_key(&step.id) {
                return Err(StoreError::NotFound(step.id.clone()));
            }
            state.steps.insert(step.id.clone(), step.clone());
        }
        if let Some(job) = &transition.job {
            if !state.jobs.contains_key(&job.id) {
                return Err(StoreError::NotFound(job.id.clone()));
            }
            state.jobs.insert(job.id.clone(), job.clone());
        }
        if let Some(step) = &transition.enqueue {
            state.steps.insert(step.id.clone(), step.clone());
        }
        Ok(())
    }

    async fn save_history(&self, step_id: &str, history_json: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        let step = state
            .steps
            .get_mut(step_id)
            .ok_or_else(|| StoreError::NotFound(step_id.to_string()))?;
        step.conversation_history = Some(history_json.to_string());
        Ok(())
    }

    async fn save_snapshot_key(
        &self,
        job_id: &str,
        snapshot_key: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        job.snapshot_key = Some(snapshot_key.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn record_heartbeat(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        let step = state
            .steps
            .get_mut(step_id)
            .ok_or_else(|| StoreError::NotFound(step_id.to_string()))?;
        step.heartbeat_at = Some(at);
        Ok(())
    }
}
