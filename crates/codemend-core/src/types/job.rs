//! Job type definitions.
//!
//! Job represents one repair task with its coarse state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse pipeline state of a Job.
///
/// Happy-path transitions:
///   INIT -> MAP_REPO -> PLAN -> IMPLEMENT -> TEST -> REVIEW -> FINALIZE -> DONE
///
/// Any state can transition to FAILED on a permanent error (retry
/// exhaustion, backtrack budget exhaustion, repo clone failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Init,
    MapRepo,
    Plan,
    Implement,
    Test,
    Review,
    Finalize,
    Done,
    Failed,
}

impl JobState {
    /// A terminal job is never modified again except for workspace cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Stable textual form used in the database and in API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Init => "INIT",
            JobState::MapRepo => "MAP_REPO",
            JobState::Plan => "PLAN",
            JobState::Implement => "IMPLEMENT",
            JobState::Test => "TEST",
            JobState::Review => "REVIEW",
            JobState::Finalize => "FINALIZE",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        }
    }

    /// Parse the textual form back; `None` for unknown input.
    pub fn parse(raw: &str) -> Option<JobState> {
        match raw {
            "INIT" => Some(JobState::Init),
            "MAP_REPO" => Some(JobState::MapRepo),
            "PLAN" => Some(JobState::Plan),
            "IMPLEMENT" => Some(JobState::Implement),
            "TEST" => Some(JobState::Test),
            "REVIEW" => Some(JobState::Review),
            "FINALIZE" => Some(JobState::Finalize),
            "DONE" => Some(JobState::Done),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One repair task submitted by a user.
///
/// A Job owns an ordered collection of Steps, one per agent role
/// execution; they are materialized on demand from the store. The
/// workspace reference is assigned exactly once at submission and
/// never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier (UUIDv4 rendered as text)
    pub id: String,
    /// Source repository locator
    pub repo_url: String,
    /// Revision to check out; defaults to "main" at the ingress layer
    pub git_ref: String,
    /// Coarse pipeline state
    pub state: JobState,
    /// Opaque identifier the execution service uses to address the clone
    pub workspace_ref: String,
    /// Latest workspace snapshot key, set by the Implementer prolog
    pub snapshot_key: Option<String>,
    /// Human-readable bug description (optional)
    pub task_description: Option<String>,
    /// Failing test identifier (optional)
    pub failing_test: Option<String>,
    /// Consecutive Tester failures; resets on a passing Tester result
    pub consecutive_test_failures: u32,
    /// Completed PLAN -> IMPLEMENT -> TEST cycles (informational)
    pub iteration_count: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in the INIT state. The workspace reference is the
    /// job's own identity serialized as text.
    pub fn new(
        repo_url: impl Into<String>,
        git_ref: impl Into<String>,
        task_description: Option<String>,
        failing_test: Option<String>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            workspace_ref: id.clone(),
            id,
            repo_url: repo_url.into(),
            git_ref: git_ref.into(),
            state: JobState::Init,
            snapshot_key: None,
            task_description,
            failing_test,
            consecutive_test_failures: 0,
            iteration_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the coarse state and the last-update timestamp.
    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn record_test_failure(&mut self) {
        self.consecutive_test_failures += 1;
        self.updated_at = Utc::now();
    }

    pub fn reset_test_failures(&mut self) {
        self.consecutive_test_failures = 0;
        self.updated_at = Utc::now();
    }

    /// Count one more PLAN -> IMPLEMENT -> TEST cycle.
    pub fn begin_iteration(&mut self) {
        self.iteration_count += 1;
        self.updated_at = Utc::now();
    }
}
