//! The code-action agent loop.
//!
//! For a claimed step this module:
//! 1. Builds a role-specific system prompt with live tool documentation
//! 2. Feeds prior agents' results as context
//! 3. Runs a multi-turn conversation with the LLM: the model emits a
//!    code block, the sandbox runs it, the formatted observation comes
//!    back, and the cycle repeats until the model writes `<result>`
//! 4. Finalizes or fails the step through the job service
//!
//! The loop is what makes the platform an agent rather than a fixed
//! pipeline: the model self-corrects on real execution output (compile
//! errors, test failures, wrong file contents).

mod parser;
mod prompts;

pub use parser::{extract_code_block, extract_result};
pub use prompts::SystemPrompts;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument};

use codemend_core::types::{AgentRole, Job, Message, Step, PIPELINE};
use codemend_exec::WorkspaceApi;
use codemend_llm::{LlmApi, LlmError};

use crate::service::{reports_test_failure, JobService, ServiceError};

/// Appended in place of a missing code block so the model keeps moving.
const NUDGE: &str =
    "Continue. Use a code block to take an action, or write <result>...</result> when you are done.";

const TRUNCATION_MARKER: &str = "\n[... output truncated ...]";

/// Tunables for the loop; defaults follow the platform contract.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub model: String,
    /// Maximum turns per step to prevent infinite loops.
    pub max_turns: u32,
    /// Cap on a single observation. Large file reads on big repos would
    /// otherwise push the history past the model's context limit: at
    /// ~4 chars/token, 8 000 chars is ~2 000 tokens per observation.
    pub max_observation_chars: usize,
    /// Wall-clock budget handed to the sandbox per code action.
    pub code_timeout_secs: u64,
    /// Heartbeat cadence, in turns.
    pub heartbeat_every_turns: u32,
    /// Persisted histories estimated above this many tokens are not
    /// resumed; resuming would immediately overflow the context again.
    pub resume_token_limit: usize,
    /// Backoff after an LLM rate-limit signal.
    pub rate_limit_backoff: Duration,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-6".to_string(),
            max_turns: 20,
            max_observation_chars: 8_000,
            code_timeout_secs: 300,
            heartbeat_every_turns: 3,
            resume_token_limit: 150_000,
            rate_limit_backoff: Duration::from_secs(60),
        }
    }
}

/// Per-step worker routine.
pub struct AgentLoop {
    jobs: Arc<JobService>,
    llm: Arc<dyn LlmApi>,
    workspace: Arc<dyn WorkspaceApi>,
    prompts: SystemPrompts,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        jobs: Arc<JobService>,
        llm: Arc<dyn LlmApi>,
        workspace: Arc<dyn WorkspaceApi>,
        prompts: SystemPrompts,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            jobs,
            llm,
            workspace,
            prompts,
            config,
        }
    }

    /// Run the full agent loop for one claimed step.
    ///
    /// Blocks its worker until the agent finishes (result found), gives
    /// up (max turns), or an error fails the step. The diagnostic span
    /// carries job id, step id, role, and attempt on every log line and
    /// closes on all exit paths, so nothing leaks to the next task that
    /// reuses the worker.
    pub async fn run(&self, step: Step) -> Result<(), ServiceError> {
        let span = tracing::info_span!(
            "agent_loop",
            job_id = %step.job_id,
            step_id = %step.id,
            role = %step.role,
            attempt = step.attempt,
        );
        self.run_inner(step).instrument(span).await
    }

    async fn run_inner(&self, mut step: Step) -> Result<(), ServiceError> {
        info!("starting agent loop");

        let Some(job) = self.jobs.find_job(&step.job_id).await? else {
            return self.jobs.fail_step(&mut step, "owning job not found").await;
        };
        let prior = self.jobs.completed_results(&job.id).await?;

        if step.role == AgentRole::Implementer {
            self.snapshot_before_implementer(&job).await;
        }

        let mut history = self.load_or_init_history(&step, &job, &prior);

        let mut turn: u32 = 1;
        while turn <= self.config.max_turns {
            debug!(turn, max_turns = self.config.max_turns, "agent turn");

            let reply = match self
                .llm
                .complete(&self.config.model, self.prompts.get(step.role), &history)
                .await
            {
                Ok(reply) => reply,
                Err(LlmError::RateLimited) => {
                    warn!(turn, "rate limited by LLM service, backing off");
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                    // A transient rate limit does not consume the turn.
                    continue;
                }
                Err(e) => {
                    return self
                        .jobs
                        .fail_step(&mut step, &format!("LLM error: {e}"))
                        .await;
                }
            };
            history.push(Message::assistant(reply.clone()));

            if let Some(result) = extract_result(&reply) {
                info!(turn, "step completed");
                return self.jobs.complete_step(&mut step, &result).await;
            }

            let observation = match extract_code_block(&reply) {
                Some(code) => {
                    match self
                        .workspace
                        .run_code(&job.workspace_ref, &code, self.config.code_timeout_secs)
                        .await
                    {
                        Ok(result) => truncate_observation(
                            &result.to_observation(),
                            self.config.max_observation_chars,
                        ),
                        Err(e) => {
                            return self
                                .jobs
                                .fail_step(&mut step, &format!("executor error: {e}"))
                                .await;
                        }
                    }
                }
                None => NUDGE.to_string(),
            };
            history.push(Message::user(format!("Observation:\n{observation}")));

            self.persist_history(&step, &history).await;

            if turn % self.config.heartbeat_every_turns == 0 {
                self.jobs.heartbeat(&step).await?;
            }
            turn += 1;
        }

        self.jobs
            .fail_step(
                &mut step,
                &format!(
                    "max turns ({}) reached without producing a <result> block",
                    self.config.max_turns
                ),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Snapshot the workspace before an Implementer run.
    ///
    /// If a snapshot key already exists on the job (retry or a later
    /// iteration), restore it first so the Implementer always starts
    /// from the pristine pre-implementation state. Failures degrade to
    /// "no rollback available" but never fail the step.
    async fn snapshot_before_implementer(&self, job: &Job) {
        if let Some(existing) = &job.snapshot_key {
            match self
                .workspace
                .restore_workspace(&job.workspace_ref, existing)
                .await
            {
                Ok(()) => info!(snapshot_key = %existing, "workspace restored before implementer"),
                Err(e) => warn!(
                    snapshot_key = %existing,
                    error = %e,
                    "could not restore snapshot, starting from current state"
                ),
            }
        }
        match self.workspace.snapshot_workspace(&job.workspace_ref).await {
            Ok(key) => {
                if let Err(e) = self.jobs.save_snapshot_key(&job.id, &key).await {
                    warn!(snapshot_key = %key, error = %e, "could not persist snapshot key");
                } else {
                    info!(snapshot_key = %key, "snapshot taken before implementer");
                }
            }
            Err(e) => warn!(error = %e, "could not snapshot workspace, rollback unavailable"),
        }
    }

    /// Load saved history (crash recovery) or start a fresh conversation.
    fn load_or_init_history(
        &self,
        step: &Step,
        job: &Job,
        prior: &HashMap<AgentRole, String>,
    ) -> Vec<Message> {
        if let Some(saved) = step
            .conversation_history
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            // Rough token estimate: ~4 chars per token. A history near
            // the context limit would fail again right after resuming.
            let estimated_tokens = saved.len() / 4;
            if estimated_tokens > self.config.resume_token_limit {
                warn!(
                    estimated_tokens,
                    "saved history too large to resume safely, starting fresh"
                );
            } else {
                match serde_json::from_str::<Vec<Message>>(saved) {
                    Ok(restored) => {
                        info!(
                            messages = restored.len(),
                            estimated_tokens, "resuming from saved history"
                        );
                        return restored;
                    }
                    Err(e) => {
                        warn!(error = %e, "could not deserialize history, starting fresh");
                    }
                }
            }
        }
        vec![Message::user(build_initial_prompt(job, step.role, prior))]
    }

    /// Serialize and save the conversation history.
    ///
    /// Failures are logged but never propagated: a missed save only
    /// costs one repeated turn on resume.
    async fn persist_history(&self, step: &Step, history: &[Message]) {
        match serde_json::to_string(history) {
            Ok(encoded) => {
                if let Err(e) = self.jobs.save_history(step, &encoded).await {
                    warn!(error = %e, "could not persist conversation history");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize conversation history"),
        }
    }
}

/// Build the first user message for a step.
///
/// Contains the task context (for the roles that need it), the outputs
/// of all previously completed agents, and the role-specific
/// instruction.
fn build_initial_prompt(job: &Job, role: AgentRole, prior: &HashMap<AgentRole, String>) -> String {
    let mut prompt = format!("You are starting your task as the {role} agent.\n\n");

    let wants_task_context = matches!(role, AgentRole::RepoMapper | AgentRole::Planner);
    if wants_task_context && (job.task_description.is_some() || job.failing_test.is_some()) {
        prompt.push_str("=== TASK CONTEXT ===\n");
        if let Some(description) = &job.task_description {
            prompt.push_str(&format!("Bug description : {description}\n"));
        }
        if let Some(failing_test) = &job.failing_test {
            prompt.push_str(&format!("Failing test    : {failing_test}\n"));
        }
        prompt.push_str("=== END TASK CONTEXT ===\n\n");
    }

    if !prior.is_empty() {
        prompt.push_str("=== CONTEXT FROM PREVIOUS AGENTS ===\n");
        for prior_role in PIPELINE {
            if let Some(result) = prior.get(&prior_role) {
                prompt.push_str(&format!("[ {prior_role} result ]\n{result}\n\n"));
            }
        }
        prompt.push_str("=== END CONTEXT ===\n\n");
    }

    prompt.push_str(role_instruction(role, prior));
    prompt
}

fn role_instruction(role: AgentRole, prior: &HashMap<AgentRole, String>) -> &'static str {
    match role {
        AgentRole::RepoMapper => {
            "Explore the repository in the workspace and produce the required JSON summary. \
             Focus your analysis on the area described in the task context above."
        }
        AgentRole::Planner => {
            let replanning = prior
                .get(&AgentRole::Tester)
                .map(|result| reports_test_failure(result))
                .unwrap_or(false);
            if replanning {
                "The previous implementation FAILED the tests (see TESTER result above). \
                 Study the failure details and produce a REVISED repair plan that correctly \
                 addresses the root cause."
            } else {
                "Using the repository map and task context above, analyse the codebase \
                 and produce a repair plan targeting the described bug."
            }
        }
        AgentRole::Implementer => {
            "Follow the repair plan above. Apply the changes using apply_patch() and verify."
        }
        AgentRole::Tester => {
            "Run the test suite with run_command([\"mvn\", \"-q\", \"test\"]) and report results."
        }
        AgentRole::Reviewer => "Review the repair. Run git_diff(\"HEAD\") and assess the changes.",
        AgentRole::Finalizer => {
            "All pipeline stages are complete. Summarise the repair run using the prior agent \
             results above. Optionally run git_diff(\"HEAD\") to confirm the final patch."
        }
    }
}

/// Cap an observation at `max_chars`, ending in an explicit marker.
fn truncate_observation(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = raw.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_context() -> Job {
        Job::new(
            "git://example/r.git",
            "main",
            Some("NPE in parser".to_string()),
            Some("ParserTest#testEmpty".to_string()),
        )
    }

    #[test]
    fn test_truncation_yields_exact_cap_with_marker() {
        let raw = "x".repeat(20_000);
        let truncated = truncate_observation(&raw, 8_000);
        assert_eq!(truncated.chars().count(), 8_000);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_is_a_no_op_below_the_cap() {
        let raw = "short output";
        assert_eq!(truncate_observation(raw, 8_000), raw);
    }

    #[test]
    fn test_initial_prompt_includes_task_context_for_planner() {
        let job = job_with_context();
        let prompt = build_initial_prompt(&job, AgentRole::Planner, &HashMap::new());
        assert!(prompt.contains("=== TASK CONTEXT ==="));
        assert!(prompt.contains("NPE in parser"));
        assert!(prompt.contains("ParserTest#testEmpty"));
    }

    #[test]
    fn test_initial_prompt_omits_task_context_for_implementer() {
        let job = job_with_context();
        let prompt = build_initial_prompt(&job, AgentRole::Implementer, &HashMap::new());
        assert!(!prompt.contains("=== TASK CONTEXT ==="));
    }

    #[test]
    fn test_initial_prompt_lists_prior_results_in_pipeline_order() {
        let job = job_with_context();
        let mut prior = HashMap::new();
        prior.insert(AgentRole::Planner, "{\"plan\":1}".to_string());
        prior.insert(AgentRole::RepoMapper, "{\"files\":3}".to_string());
        let prompt = build_initial_prompt(&job, AgentRole::Implementer, &prior);
        let mapper = prompt.find("[ REPO_MAPPER result ]").expect("mapper block");
        let planner = prompt.find("[ PLANNER result ]").expect("planner block");
        assert!(mapper < planner);
    }

    #[test]
    fn test_planner_sees_revised_plan_instruction_after_tester_failure() {
        let job = job_with_context();
        let mut prior = HashMap::new();
        prior.insert(
            AgentRole::Tester,
            "{\"tests_passed\":false,\"failures\":1}".to_string(),
        );
        let prompt = build_initial_prompt(&job, AgentRole::Planner, &prior);
        assert!(prompt.contains("REVISED repair plan"));

        prior.insert(AgentRole::Tester, "{\"tests_passed\":true}".to_string());
        let prompt = build_initial_prompt(&job, AgentRole::Planner, &prior);
        assert!(!prompt.contains("REVISED repair plan"));
    }
}
