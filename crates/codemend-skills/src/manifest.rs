//! Skill identity, documentation, and policy types.

use std::fmt;

/// Where a skill's execute call actually runs.
///
/// InProcess — runs inside the control plane; pure computation only
/// (policy checks, parsing, heuristics).
///
/// Executor — the skill describes a function injected into the agent
/// sandbox. Agents invoke these by emitting code blocks; the registry
/// never calls their execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    InProcess,
    Executor,
}

impl ExecutionTarget {
    /// The tag recorded under `skill_call_duration_seconds{target=...}`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionTarget::InProcess => "in_process",
            ExecutionTarget::Executor => "executor",
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and documentation contract for a skill.
#[derive(Debug, Clone)]
pub struct SkillManifest {
    /// Unique lookup name, also how agents reference the tool
    pub name: &'static str,
    /// Semantic version
    pub version: &'static str,
    /// Python-style signature shown verbatim in agent system prompts
    pub signature: &'static str,
    /// One-line docstring injected into the tool documentation
    pub description: &'static str,
    pub target: ExecutionTarget,
}

/// Execution constraints for a skill.
///
/// Executor-routed skills never get network access — the sandbox has no
/// egress. Filesystem write is true only for skills that mutate the
/// workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillPolicy {
    pub network_allowed: bool,
    pub filesystem_write: bool,
    pub command_timeout_secs: u64,
}

impl SkillPolicy {
    /// Read-only executor skill.
    pub const fn read_only(timeout_secs: u64) -> Self {
        Self {
            network_allowed: false,
            filesystem_write: false,
            command_timeout_secs: timeout_secs,
        }
    }

    /// Workspace-mutating executor skill.
    pub const fn write_allowed(timeout_secs: u64) -> Self {
        Self {
            network_allowed: false,
            filesystem_write: true,
            command_timeout_secs: timeout_secs,
        }
    }

    /// In-process skill: no subprocess, no filesystem.
    pub const fn in_process() -> Self {
        Self {
            network_allowed: false,
            filesystem_write: false,
            command_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_factories() {
        let ro = SkillPolicy::read_only(30);
        assert!(!ro.network_allowed);
        assert!(!ro.filesystem_write);
        assert_eq!(ro.command_timeout_secs, 30);

        let rw = SkillPolicy::write_allowed(300);
        assert!(rw.filesystem_write);

        let local = SkillPolicy::in_process();
        assert!(!local.filesystem_write);
        assert_eq!(local.command_timeout_secs, 5);
    }
}
