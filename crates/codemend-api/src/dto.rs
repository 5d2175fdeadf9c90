//! Request and response bodies for the job API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use codemend_core::types::{Job, Step};

/// Request body for POST /jobs.
///
/// Required: repoUrl. Optional: gitRef (defaults to "main" when absent
/// or blank), taskDescription and failingTest — when provided they are
/// forwarded to the RepoMapper and Planner so the agents know exactly
/// what bug to look for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub repo_url: String,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub failing_test: Option<String>,
}

impl SubmitJobRequest {
    /// The revision to check out; blank or absent means "main".
    pub fn git_ref_or_default(&self) -> String {
        match self.git_ref.as_deref() {
            Some(git_ref) if !git_ref.trim().is_empty() => git_ref.to_string(),
            _ => "main".to_string(),
        }
    }
}

/// Response body for POST /jobs and GET /jobs/{id}.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub state: String,
    pub repo_url: String,
    pub git_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobResponse {
    pub fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            state: job.state.as_str().to_string(),
            repo_url: job.repo_url.clone(),
            git_ref: job.git_ref.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Read-only view of a pipeline step returned by GET /jobs/{id}/steps.
///
/// resultJson carries the agent's structured output (repo map, repair
/// plan, test report) and is the primary artefact consumed by
/// evaluation tooling.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub id: String,
    pub role: String,
    pub state: String,
    pub attempt: u32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub result_json: Option<String>,
}

impl StepResponse {
    pub fn from(step: &Step) -> Self {
        Self {
            id: step.id.clone(),
            role: step.role.as_str().to_string(),
            state: step.state.as_str().to_string(),
            attempt: step.attempt,
            worker_id: step.worker_id.clone(),
            created_at: step.created_at,
            started_at: step.started_at,
            finished_at: step.finished_at,
            heartbeat_at: step.heartbeat_at,
            result_json: step.result_json.clone(),
        }
    }
}
