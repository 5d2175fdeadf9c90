//! Store module
//!
//! This module defines the durable-store abstraction:
//! - ControlStore: persistence for jobs and steps, including the atomic
//!   claim primitive and composite state-machine transitions
//!
//! Note: Implementations are in the codemend-stores crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Job, Step};

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A composite state-machine write committed atomically.
///
/// `step` and `job` update existing rows in place; `enqueue` inserts a
/// freshly created step. Completing a step and creating its successor
/// commit together so a crash can never observe the pipeline advanced
/// without the completed step, or vice versa.
#[derive(Debug, Clone, Default)]
pub struct StepTransition {
    pub step: Option<Step>,
    pub job: Option<Job>,
    pub enqueue: Option<Step>,
}

/// Persistence contract for the control plane.
///
/// The store is the sole source of truth for pipeline state; all writes
/// go through the job service. `claim_next_pending` must be safe under
/// arbitrary concurrent callers: no two callers may receive the same
/// step (skip-locked semantics in the PostgreSQL implementation, a
/// single mutex in the in-memory one).
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn fetch_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    async fn insert_step(&self, step: &Step) -> Result<(), StoreError>;

    async fn fetch_step(&self, step_id: &str) -> Result<Option<Step>, StoreError>;

    /// All steps of a job in creation order.
    async fn steps_for_job(&self, job_id: &str) -> Result<Vec<Step>, StoreError>;

    /// Atomically claim the oldest PENDING step: transition it to RUNNING,
    /// record the worker id, stamp started_at and heartbeat_at, and return
    /// the updated row. Returns `None` (and performs no writes) when no
    /// PENDING step exists. Tie-break: ascending created_at, then id.
    async fn claim_next_pending(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Step>, StoreError>;

    /// All RUNNING steps whose heartbeat is older than the cutoff.
    async fn running_stalled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError>;

    /// Commit a composite transition in a single transaction.
    async fn commit_transition(&self, transition: &StepTransition) -> Result<(), StoreError>;

    /// Single-row update of a step's persisted conversation history.
    async fn save_history(&self, step_id: &str, history_json: &str) -> Result<(), StoreError>;

    /// Single-row update of a job's snapshot key.
    async fn save_snapshot_key(&self, job_id: &str, snapshot_key: &str)
        -> Result<(), StoreError>;

    /// Single-row update of a step's heartbeat timestamp.
    async fn record_heartbeat(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
