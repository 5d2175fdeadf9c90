//! Skill layer: the tool capabilities exposed to agents.
//!
//! Every capability is a versioned, policy-carrying descriptor. Skills
//! routed to the execution service are documentation-only here — agents
//! invoke them by emitting code into the sandbox. In-process skills
//! carry an executable body and run through the registry with metrics.

mod builtin;
mod manifest;
mod registry;

use std::fmt;

use thiserror::Error;

pub use builtin::builtin_skills;
pub use manifest::{ExecutionTarget, SkillManifest, SkillPolicy};
pub use registry::SkillRegistry;

/// Controlled skill-execution failure classes; each maps to a metric
/// status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillErrorKind {
    PolicyViolation,
    Timeout,
    ParseError,
    ExecutorError,
}

impl SkillErrorKind {
    /// The tag recorded under `skill_calls_total{status=...}`.
    pub fn status_tag(self) -> &'static str {
        match self {
            SkillErrorKind::PolicyViolation => "policy_violation",
            SkillErrorKind::Timeout => "timeout",
            SkillErrorKind::ParseError => "parse_error",
            SkillErrorKind::ExecutorError => "executor_error",
        }
    }
}

impl fmt::Display for SkillErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkillErrorKind::PolicyViolation => "POLICY_VIOLATION",
            SkillErrorKind::Timeout => "TIMEOUT",
            SkillErrorKind::ParseError => "PARSE_ERROR",
            SkillErrorKind::ExecutorError => "EXECUTOR_ERROR",
        };
        f.write_str(label)
    }
}

/// Skill layer errors.
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill '{0}' is not registered")]
    NotFound(String),
    #[error("[{kind}] {message}")]
    Failed {
        kind: SkillErrorKind,
        message: String,
    },
}

impl SkillError {
    pub fn failed(kind: SkillErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Runtime context passed to every in-process skill invocation.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub workspace_ref: String,
    pub job_id: String,
}

/// A registered tool capability.
pub trait Skill: Send + Sync {
    /// Identity, documentation, and routing metadata.
    fn manifest(&self) -> &SkillManifest;

    /// Execution constraints.
    fn policy(&self) -> &SkillPolicy;

    /// Execute the skill.
    ///
    /// Executor-routed skills are never executed through the registry;
    /// their implementations return an executor-error so a misrouted
    /// call fails loudly.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: &SkillContext,
    ) -> Result<serde_json::Value, SkillError>;
}
