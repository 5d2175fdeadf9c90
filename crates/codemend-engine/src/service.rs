//! Core business logic for job and step lifecycle.
//!
//! Every state-machine decision lives here; the store only commits the
//! resulting row changes atomically. Claiming relies on the store's
//! skip-locked selector so concurrent workers never receive the same
//! step.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use codemend_core::store::{ControlStore, StepTransition, StoreError};
use codemend_core::types::{AgentRole, Job, JobState, Step, StepState};
use codemend_exec::WorkspaceApi;

/// A step is retried until this many attempts have failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// A RUNNING step whose heartbeat is older than this is reclaimed.
const STALL_TIMEOUT_MINUTES: i64 = 5;

/// Job service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job {0} not found")]
    JobNotFound(String),
}

/// Submission parameters for a new repair job.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    pub repo_url: String,
    pub git_ref: String,
    pub task_description: Option<String>,
    pub failing_test: Option<String>,
}

/// Transactional custodian of the job/step state machine.
pub struct JobService {
    store: Arc<dyn ControlStore>,
    workspace: Arc<dyn WorkspaceApi>,
}

impl JobService {
    pub fn new(store: Arc<dyn ControlStore>, workspace: Arc<dyn WorkspaceApi>) -> Self {
        Self { store, workspace }
    }

    pub fn store(&self) -> &Arc<dyn ControlStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Job submission
    // ------------------------------------------------------------------

    /// Create a new repair job and kick off the pipeline.
    ///
    /// The job's own id doubles as the workspace reference. On clone
    /// failure the job transitions straight to FAILED and no step is
    /// created.
    pub async fn submit(&self, request: SubmitJob) -> Result<Job, ServiceError> {
        let mut job = Job::new(
            request.repo_url,
            request.git_ref,
            request.task_description,
            request.failing_test,
        );
        self.store.insert_job(&job).await?;

        if let Err(e) = self
            .workspace
            .create_workspace(&job.workspace_ref, &job.repo_url, &job.git_ref)
            .await
        {
            error!(job_id = %job.id, error = %e, "workspace creation failed");
            job.set_state(JobState::Failed);
            self.store.update_job(&job).await?;
            return Ok(job);
        }

        let step = Step::new(&job.id, AgentRole::RepoMapper);
        job.set_state(JobState::MapRepo);
        self.store
            .commit_transition(&StepTransition {
                step: None,
                job: Some(job.clone()),
                enqueue: Some(step),
            })
            .await?;
        info!(job_id = %job.id, repo_url = %job.repo_url, "job submitted");
        Ok(job)
    }

    pub async fn find_job(&self, job_id: &str) -> Result<Option<Job>, ServiceError> {
        Ok(self.store.fetch_job(job_id).await?)
    }

    /// All steps for a job in creation order.
    pub async fn steps(&self, job_id: &str) -> Result<Vec<Step>, ServiceError> {
        Ok(self.store.steps_for_job(job_id).await?)
    }

    // ------------------------------------------------------------------
    // Step claiming (called by the scheduler)
    // ------------------------------------------------------------------

    /// Claim the oldest PENDING step for execution, or `None`.
    pub async fn claim_next_step(&self, worker_id: &str) -> Result<Option<Step>, ServiceError> {
        let claimed = self.store.claim_next_pending(worker_id, Utc::now()).await?;
        if let Some(step) = &claimed {
            info!(
                worker_id,
                step_id = %step.id,
                job_id = %step.job_id,
                role = %step.role,
                "step claimed"
            );
        }
        Ok(claimed)
    }

    // ------------------------------------------------------------------
    // Step completion (called by the agent loop)
    // ------------------------------------------------------------------

    /// Mark a step DONE and advance the pipeline.
    ///
    /// Tester steps reporting a failure drive the backtracking logic:
    /// the first failure re-queues a PLANNER step and returns the job to
    /// PLAN; a second consecutive failure exhausts the backtrack budget
    /// and fails the job. The failure counter resets whenever the Tester
    /// passes.
    pub async fn complete_step(
        &self,
        step: &mut Step,
        result_json: &str,
    ) -> Result<(), ServiceError> {
        step.state = StepState::Done;
        step.finished_at = Some(Utc::now());
        step.result_json = Some(result_json.to_string());
        step.worker_id = None;

        let mut job = self
            .store
            .fetch_job(&step.job_id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound(step.job_id.clone()))?;

        if step.role == AgentRole::Tester && !tests_passed(result_json) {
            job.record_test_failure();
            if job.consecutive_test_failures >= 2 {
                job.set_state(JobState::Failed);
                self.store
                    .commit_transition(&StepTransition {
                        step: Some(step.clone()),
                        job: Some(job.clone()),
                        enqueue: None,
                    })
                    .await?;
                error!(
                    job_id = %job.id,
                    failures = job.consecutive_test_failures,
                    "backtrack budget exhausted, job failed"
                );
                self.cleanup_workspace(&job).await;
            } else {
                job.begin_iteration();
                job.set_state(JobState::Plan);
                let replan = Step::new(&job.id, AgentRole::Planner);
                self.store
                    .commit_transition(&StepTransition {
                        step: Some(step.clone()),
                        job: Some(job.clone()),
                        enqueue: Some(replan),
                    })
                    .await?;
                warn!(
                    job_id = %job.id,
                    iteration = job.iteration_count,
                    failures = job.consecutive_test_failures,
                    "tests failed, backtracking to PLAN"
                );
            }
            return Ok(());
        }

        if step.role == AgentRole::Tester {
            job.reset_test_failures();
        }

        match step.role.next() {
            None => {
                job.set_state(JobState::Done);
                self.store
                    .commit_transition(&StepTransition {
                        step: Some(step.clone()),
                        job: Some(job.clone()),
                        enqueue: None,
                    })
                    .await?;
                info!(job_id = %job.id, "job done");
                self.cleanup_workspace(&job).await;
            }
            Some(next_role) => {
                let next = Step::new(&job.id, next_role);
                job.set_state(next_role.job_state());
                self.store
                    .commit_transition(&StepTransition {
                        step: Some(step.clone()),
                        job: Some(job.clone()),
                        enqueue: Some(next),
                    })
                    .await?;
                info!(job_id = %job.id, state = %job.state, "job advancing");
            }
        }
        Ok(())
    }

    /// Mark a step failed.
    ///
    /// Below the attempt cap the step returns to PENDING (the next claim
    /// preserves the attempt counter); at the cap the step and its job
    /// fail permanently.
    pub async fn fail_step(&self, step: &mut Step, reason: &str) -> Result<(), ServiceError> {
        step.attempt += 1;
        step.worker_id = None;

        if step.attempt < MAX_ATTEMPTS {
            step.state = StepState::Pending;
            step.started_at = None;
            step.finished_at = None;
            self.store
                .commit_transition(&StepTransition {
                    step: Some(step.clone()),
                    job: None,
                    enqueue: None,
                })
                .await?;
            warn!(
                step_id = %step.id,
                attempt = step.attempt,
                max_attempts = MAX_ATTEMPTS,
                reason,
                "step failed, will retry"
            );
        } else {
            step.state = StepState::Failed;
            step.finished_at = Some(Utc::now());
            let mut job = self
                .store
                .fetch_job(&step.job_id)
                .await?
                .ok_or_else(|| ServiceError::JobNotFound(step.job_id.clone()))?;
            job.set_state(JobState::Failed);
            self.store
                .commit_transition(&StepTransition {
                    step: Some(step.clone()),
                    job: Some(job.clone()),
                    enqueue: None,
                })
                .await?;
            error!(
                step_id = %step.id,
                job_id = %job.id,
                attempts = step.attempt,
                reason,
                "step permanently failed, job failed"
            );
            self.cleanup_workspace(&job).await;
        }
        Ok(())
    }

    /// Prove liveness for a running step.
    pub async fn heartbeat(&self, step: &Step) -> Result<(), ServiceError> {
        Ok(self.store.record_heartbeat(&step.id, Utc::now()).await?)
    }

    /// Detect and recover steps whose worker has gone silent.
    ///
    /// The sole liveness mechanism for crashed workers: each stalled
    /// step goes through `fail_step`, so it is either retried or, past
    /// the attempt cap, failed permanently.
    pub async fn reclaim_stalled(&self) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - Duration::minutes(STALL_TIMEOUT_MINUTES);
        let stalled = self.store.running_stalled_before(cutoff).await?;
        let count = stalled.len();
        for mut step in stalled {
            warn!(
                step_id = %step.id,
                worker_id = step.worker_id.as_deref().unwrap_or("?"),
                heartbeat_at = ?step.heartbeat_at,
                "reclaiming stalled step"
            );
            self.fail_step(&mut step, "worker heartbeat timed out after 5 minutes")
                .await?;
        }
        Ok(count)
    }

    /// All DONE step results for a job, keyed by role.
    ///
    /// After backtracking there can be multiple DONE steps with the same
    /// role; the latest result per role wins so agents always see the
    /// most recent prior work.
    pub async fn completed_results(
        &self,
        job_id: &str,
    ) -> Result<HashMap<AgentRole, String>, ServiceError> {
        let mut results = HashMap::new();
        for step in self.store.steps_for_job(job_id).await? {
            if step.state == StepState::Done {
                if let Some(result) = step.result_json {
                    results.insert(step.role, result);
                }
            }
        }
        Ok(results)
    }

    /// Persist a step's conversation history between turns.
    pub async fn save_history(&self, step: &Step, history_json: &str) -> Result<(), ServiceError> {
        Ok(self.store.save_history(&step.id, history_json).await?)
    }

    /// Persist the job's snapshot key installed by the Implementer prolog.
    pub async fn save_snapshot_key(
        &self,
        job_id: &str,
        snapshot_key: &str,
    ) -> Result<(), ServiceError> {
        Ok(self.store.save_snapshot_key(job_id, snapshot_key).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Delete the workspace of a job that reached a terminal state.
    ///
    /// The job state is already committed when this runs; a failed
    /// delete must never surface, so errors are logged and swallowed.
    async fn cleanup_workspace(&self, job: &Job) {
        match self.workspace.delete_workspace(&job.workspace_ref).await {
            Ok(()) => info!(
                workspace_ref = %job.workspace_ref,
                job_id = %job.id,
                "workspace deleted"
            ),
            Err(e) => warn!(
                workspace_ref = %job.workspace_ref,
                job_id = %job.id,
                error = %e,
                "could not delete workspace, manual cleanup may be needed"
            ),
        }
    }
}

/// Whether a Tester result payload reports a passing run.
///
/// A substring check rather than full JSON parsing: the Tester prompt
/// fixes the exact field name, and any other payload shape counts as a
/// failure.
pub fn tests_passed(result_json: &str) -> bool {
    result_json.contains("\"tests_passed\":true") || result_json.contains("\"tests_passed\": true")
}

/// Whether a Tester result payload explicitly reports a failing run.
/// Used by the Planner prompt to detect a backtrack scenario.
pub fn reports_test_failure(result_json: &str) -> bool {
    result_json.contains("\"tests_passed\":false")
        || result_json.contains("\"tests_passed\": false")
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_exec::RecordingWorkspace;
    use codemend_stores::InMemoryControlStore;

    fn service() -> (JobService, Arc<RecordingWorkspace>) {
        let workspace = Arc::new(RecordingWorkspace::new());
        let store = Arc::new(InMemoryControlStore::new());
        (JobService::new(store, workspace.clone()), workspace)
    }

    fn request() -> SubmitJob {
        SubmitJob {
            repo_url: "https://github.com/org/repo.git".to_string(),
            git_ref: "main".to_string(),
            task_description: None,
            failing_test: None,
        }
    }

    async fn submitted(service: &JobService) -> Job {
        service.submit(request()).await.expect("submit")
    }

    async fn claim(service: &JobService) -> Step {
        service
            .claim_next_step("worker-test")
            .await
            .expect("claim")
            .expect("a pending step")
    }

    #[tokio::test]
    async fn test_submit_creates_job_and_first_step() {
        let (service, workspace) = service();
        let job = submitted(&service).await;

        assert_eq!(job.state, JobState::MapRepo);
        assert_eq!(workspace.create_count(), 1);
        let steps = service.steps(&job.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].role, AgentRole::RepoMapper);
        assert_eq!(steps[0].state, StepState::Pending);
    }

    #[tokio::test]
    async fn test_submit_clone_failure_fails_job_without_steps() {
        let (service, workspace) = service();
        workspace.fail_next_create();
        let job = submitted(&service).await;

        assert_eq!(job.state, JobState::Failed);
        assert!(service.steps(&job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_step_below_cap_resets_to_pending() {
        let (service, _workspace) = service();
        let job = submitted(&service).await;
        let mut step = claim(&service).await;

        service.fail_step(&mut step, "timeout").await.unwrap();

        assert_eq!(step.state, StepState::Pending);
        assert_eq!(step.attempt, 1);
        assert!(step.started_at.is_none());
        assert!(step.finished_at.is_none());
        assert!(step.worker_id.is_none());
        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::MapRepo);
    }

    #[tokio::test]
    async fn test_fail_step_at_cap_fails_step_and_job() {
        let (service, workspace) = service();
        let job = submitted(&service).await;

        let mut step = claim(&service).await;
        service.fail_step(&mut step, "first").await.unwrap();
        let mut step = claim(&service).await;
        assert_eq!(step.attempt, 1);
        service.fail_step(&mut step, "second").await.unwrap();
        let mut step = claim(&service).await;
        assert_eq!(step.attempt, 2);
        service.fail_step(&mut step, "third").await.unwrap();

        assert_eq!(step.state, StepState::Failed);
        assert_eq!(step.attempt, 3);
        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(workspace.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_repo_mapper_advances_to_planner() {
        let (service, _workspace) = service();
        let job = submitted(&service).await;
        let mut step = claim(&service).await;

        service
            .complete_step(&mut step, "{\"repo_map\": true}")
            .await
            .unwrap();

        assert_eq!(step.state, StepState::Done);
        assert!(step.worker_id.is_none());
        assert!(step.finished_at.is_some());
        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Plan);
        let steps = service.steps(&job.id).await.unwrap();
        assert!(steps
            .iter()
            .any(|s| s.role == AgentRole::Planner && s.state == StepState::Pending));
    }

    #[tokio::test]
    async fn test_complete_finalizer_marks_job_done() {
        let (service, workspace) = service();
        let job = submitted(&service).await;

        for expected in [
            AgentRole::RepoMapper,
            AgentRole::Planner,
            AgentRole::Implementer,
            AgentRole::Tester,
            AgentRole::Reviewer,
            AgentRole::Finalizer,
        ] {
            let mut step = claim(&service).await;
            assert_eq!(step.role, expected);
            let payload = if expected == AgentRole::Tester {
                "{\"tests_passed\":true}"
            } else {
                "{}"
            };
            service.complete_step(&mut step, payload).await.unwrap();
        }

        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(workspace.delete_count(), 1);
        assert!(service
            .claim_next_step("worker-test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tester_failure_backtracks_to_planner() {
        let (service, _workspace) = service();
        let job = submitted(&service).await;
        for _ in 0..3 {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, "{}").await.unwrap();
        }

        let mut tester = claim(&service).await;
        assert_eq!(tester.role, AgentRole::Tester);
        service
            .complete_step(&mut tester, "{\"tests_passed\":false,\"failures\":1}")
            .await
            .unwrap();

        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Plan);
        assert_eq!(job.consecutive_test_failures, 1);
        assert_eq!(job.iteration_count, 1);
        let next = claim(&service).await;
        assert_eq!(next.role, AgentRole::Planner);
    }

    #[tokio::test]
    async fn test_second_tester_failure_exhausts_backtrack_budget() {
        let (service, workspace) = service();
        let job = submitted(&service).await;

        // First cycle up to the failing tester.
        for _ in 0..3 {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, "{}").await.unwrap();
        }
        let mut tester = claim(&service).await;
        service
            .complete_step(&mut tester, "{\"tests_passed\": false}")
            .await
            .unwrap();

        // Second cycle: planner, implementer, then another failing tester.
        for _ in 0..2 {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, "{}").await.unwrap();
        }
        let mut tester = claim(&service).await;
        assert_eq!(tester.role, AgentRole::Tester);
        service
            .complete_step(&mut tester, "{\"tests_passed\":false}")
            .await
            .unwrap();

        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.consecutive_test_failures, 2);
        assert_eq!(workspace.delete_count(), 1);
        let steps = service.steps(&job.id).await.unwrap();
        assert!(!steps.iter().any(|s| s.role == AgentRole::Reviewer));
        assert!(service
            .claim_next_step("worker-test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tester_pass_resets_failure_counter() {
        let (service, _workspace) = service();
        let job = submitted(&service).await;

        for _ in 0..3 {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, "{}").await.unwrap();
        }
        let mut tester = claim(&service).await;
        service
            .complete_step(&mut tester, "{\"tests_passed\":false}")
            .await
            .unwrap();
        for _ in 0..2 {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, "{}").await.unwrap();
        }
        let mut tester = claim(&service).await;
        service
            .complete_step(&mut tester, "{\"tests_passed\":true,\"failures\":0}")
            .await
            .unwrap();

        let job = service.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.consecutive_test_failures, 0);
        assert_eq!(job.state, JobState::Review);
    }

    #[tokio::test]
    async fn test_reclaim_stalled_resets_step() {
        let (service, _workspace) = service();
        let _job = submitted(&service).await;
        let step = claim(&service).await;

        // Backdate the heartbeat past the stall cutoff.
        service
            .store()
            .record_heartbeat(&step.id, Utc::now() - Duration::minutes(10))
            .await
            .unwrap();

        let reclaimed = service.reclaim_stalled().await.unwrap();
        assert_eq!(reclaimed, 1);
        let steps = service.steps(&step.job_id).await.unwrap();
        assert_eq!(steps[0].state, StepState::Pending);
        assert_eq!(steps[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_reclaim_with_no_stalled_steps_is_a_no_op() {
        let (service, _workspace) = service();
        let _job = submitted(&service).await;
        let _step = claim(&service).await;

        let reclaimed = service.reclaim_stalled().await.unwrap();
        assert_eq!(reclaimed, 0);
    }

    #[tokio::test]
    async fn test_completed_results_keeps_latest_per_role() {
        let (service, _workspace) = service();
        let job = submitted(&service).await;

        for payload in ["{}", "{\"plan\":1}", "{}"] {
            let mut step = claim(&service).await;
            service.complete_step(&mut step, payload).await.unwrap();
        }
        let mut tester = claim(&service).await;
        service
            .complete_step(&mut tester, "{\"tests_passed\":false}")
            .await
            .unwrap();
        let mut planner = claim(&service).await;
        assert_eq!(planner.role, AgentRole::Planner);
        service
            .complete_step(&mut planner, "{\"plan\":2}")
            .await
            .unwrap();

        let results = service.completed_results(&job.id).await.unwrap();
        assert_eq!(results.get(&AgentRole::Planner).map(String::as_str), Some("{\"plan\":2}"));
    }

    #[test]
    fn test_tests_passed_accepts_both_spacings() {
        assert!(tests_passed("{\"tests_passed\":true}"));
        assert!(tests_passed("{\"tests_passed\": true}"));
        assert!(!tests_passed("{\"tests_passed\":false}"));
        assert!(!tests_passed("{\"ok\":true}"));
        assert!(!tests_passed(""));
    }

    #[test]
    fn test_reports_test_failure_accepts_both_spacings() {
        assert!(reports_test_failure("{\"tests_passed\":false}"));
        assert!(reports_test_failure("{\"tests_passed\": false}"));
        assert!(!reports_test_failure("{\"tests_passed\":true}"));
    }
}
