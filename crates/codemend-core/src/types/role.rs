//! Agent roles and the pipeline ordering.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::JobState;

/// The six agent roles of the repair pipeline.
///
/// Roles run sequentially; each feeds its result payload into the next
/// role's initial context. Tester is the sole backtracking point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    /// Reads the repo, builds a file map and summary
    RepoMapper,
    /// Produces a step-by-step repair plan
    Planner,
    /// Writes and applies the code changes
    Implementer,
    /// Runs the test suite, interprets results
    Tester,
    /// Final diff review and approval
    Reviewer,
    /// Produces a structured run summary
    Finalizer,
}

/// Execution order of the pipeline.
pub const PIPELINE: [AgentRole; 6] = [
    AgentRole::RepoMapper,
    AgentRole::Planner,
    AgentRole::Implementer,
    AgentRole::Tester,
    AgentRole::Reviewer,
    AgentRole::Finalizer,
];

impl AgentRole {
    /// The role that follows this one, or `None` after the last role.
    pub fn next(self) -> Option<AgentRole> {
        let idx = PIPELINE.iter().position(|r| *r == self)?;
        PIPELINE.get(idx + 1).copied()
    }

    /// The coarse job state reported while this role is pending.
    pub fn job_state(self) -> JobState {
        match self {
            AgentRole::RepoMapper => JobState::MapRepo,
            AgentRole::Planner => JobState::Plan,
            AgentRole::Implementer => JobState::Implement,
            AgentRole::Tester => JobState::Test,
            AgentRole::Reviewer => JobState::Review,
            AgentRole::Finalizer => JobState::Finalize,
        }
    }

    /// Stable textual form used in the database and in API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::RepoMapper => "REPO_MAPPER",
            AgentRole::Planner => "PLANNER",
            AgentRole::Implementer => "IMPLEMENTER",
            AgentRole::Tester => "TESTER",
            AgentRole::Reviewer => "REVIEWER",
            AgentRole::Finalizer => "FINALIZER",
        }
    }

    /// Parse the textual form back; `None` for unknown input.
    pub fn parse(raw: &str) -> Option<AgentRole> {
        match raw {
            "REPO_MAPPER" => Some(AgentRole::RepoMapper),
            "PLANNER" => Some(AgentRole::Planner),
            "IMPLEMENTER" => Some(AgentRole::Implementer),
            "TESTER" => Some(AgentRole::Tester),
            "REVIEWER" => Some(AgentRole::Reviewer),
            "FINALIZER" => Some(AgentRole::Finalizer),
            _ => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order_and_successors() {
        assert_eq!(AgentRole::RepoMapper.next(), Some(AgentRole::Planner));
        assert_eq!(AgentRole::Planner.next(), Some(AgentRole::Implementer));
        assert_eq!(AgentRole::Implementer.next(), Some(AgentRole::Tester));
        assert_eq!(AgentRole::Tester.next(), Some(AgentRole::Reviewer));
        assert_eq!(AgentRole::Reviewer.next(), Some(AgentRole::Finalizer));
        assert_eq!(AgentRole::Finalizer.next(), None);
    }

    #[test]
    fn test_role_job_state_mapping() {
        assert_eq!(AgentRole::RepoMapper.job_state(), JobState::MapRepo);
        assert_eq!(AgentRole::Planner.job_state(), JobState::Plan);
        assert_eq!(AgentRole::Implementer.job_state(), JobState::Implement);
        assert_eq!(AgentRole::Tester.job_state(), JobState::Test);
        assert_eq!(AgentRole::Reviewer.job_state(), JobState::Review);
        assert_eq!(AgentRole::Finalizer.job_state(), JobState::Finalize);
    }

    #[test]
    fn test_role_text_round_trip() {
        for role in PIPELINE {
            assert_eq!(AgentRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AgentRole::parse("UNKNOWN"), None);
    }
}
