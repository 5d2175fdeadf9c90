//! Step type definitions.
//!
//! Step is one agent-role execution within a Job and the atomic unit of
//! scheduling: claimed by exactly one worker, retried up to a cap.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentRole;

/// Execution state of a Step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Done,
    Failed,
}

impl StepState {
    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "PENDING",
            StepState::Running => "RUNNING",
            StepState::Done => "DONE",
            StepState::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<StepState> {
        match raw {
            "PENDING" => Some(StepState::Pending),
            "RUNNING" => Some(StepState::Running),
            "DONE" => Some(StepState::Done),
            "FAILED" => Some(StepState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent-role execution within a Job.
///
/// The scheduler claims a PENDING step with skip-locked semantics, sets
/// state = RUNNING and worker_id, and a worker drives the agent loop
/// until it writes result_json (DONE) or fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier (UUIDv4 rendered as text)
    pub id: String,
    /// Owning job
    pub job_id: String,
    /// The agent role this step executes
    pub role: AgentRole,
    /// Execution state
    pub state: StepState,
    /// How many times this step has been attempted (starts at 0)
    pub attempt: u32,
    /// Worker that is running this step; null unless RUNNING
    pub worker_id: Option<String>,
    /// Updated periodically by the worker to prove liveness
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The agent's final `<result>` payload, JSON-encoded; non-null iff DONE
    pub result_json: Option<String>,
    /// Conversation history as a JSON array of {role, content} objects,
    /// saved after every agent turn so a crashed worker can resume mid-step
    pub conversation_history: Option<String>,
}

impl Step {
    /// Create a new PENDING step for a job.
    pub fn new(job_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            role,
            state: StepState::Pending,
            attempt: 0,
            worker_id: None,
            heartbeat_at: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result_json: None,
            conversation_history: None,
        }
    }

    /// Transition PENDING -> RUNNING for the given worker.
    pub fn begin(&mut self, worker_id: impl Into<String>, now: DateTime<Utc>) {
        self.state = StepState::Running;
        self.worker_id = Some(worker_id.into());
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
    }
}
