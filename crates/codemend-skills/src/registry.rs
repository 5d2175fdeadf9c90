//! Process-local skill registry.
//!
//! Collects every skill descriptor at construction and indexes it by
//! name. Responsible for lookup, metrics-instrumented execution of
//! in-process skills, and rendering the tool-documentation block
//! injected into every agent's system prompt.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use prometheus::{HistogramVec, IntCounterVec, Opts, Registry};
use tracing::info;

use crate::{ExecutionTarget, Skill, SkillContext, SkillError};

/// In-process catalog of tool descriptors.
pub struct SkillRegistry {
    skills: HashMap<&'static str, Arc<dyn Skill>>,
    metrics: Registry,
    calls: IntCounterVec,
    duration: HistogramVec,
}

impl SkillRegistry {
    /// Build a registry over an explicit skill list.
    pub fn new(skills: Vec<Arc<dyn Skill>>) -> Result<Self, prometheus::Error> {
        let metrics = Registry::new();
        let calls = IntCounterVec::new(
            Opts::new("skill_calls_total", "Skill invocations by outcome"),
            &["skill", "status"],
        )?;
        let duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "skill_call_duration_seconds",
                "Skill execution duration",
            ),
            &["skill", "target"],
        )?;
        metrics.register(Box::new(calls.clone()))?;
        metrics.register(Box::new(duration.clone()))?;

        let mut index = HashMap::new();
        for skill in skills {
            let (name, version, target) = {
                let manifest = skill.manifest();
                (manifest.name, manifest.version, manifest.target)
            };
            info!(skill = name, version, target = %target, "registered skill");
            index.insert(name, skill);
        }

        Ok(Self {
            skills: index,
            metrics,
            calls,
            duration,
        })
    }

    /// Build a registry over the built-in skill set.
    pub fn with_builtins() -> Result<Self, prometheus::Error> {
        Self::new(crate::builtin_skills())
    }

    /// Look up a skill by name; missing lookups fail loudly.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Skill>, SkillError> {
        self.skills
            .get(name)
            .ok_or_else(|| SkillError::NotFound(name.to_string()))
    }

    /// All registered skill names, sorted.
    pub fn skill_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.skills.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// The Prometheus registry holding the skill metric families.
    pub fn metrics(&self) -> &Registry {
        &self.metrics
    }

    /// Execute a named in-process skill; every call is timed and counted.
    pub fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &SkillContext,
    ) -> Result<serde_json::Value, SkillError> {
        let skill = self.get(name)?;
        let target = skill.manifest().target.as_str();

        let started = Instant::now();
        let result = skill.execute(input, ctx);
        self.duration
            .with_label_values(&[name, target])
            .observe(started.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "success",
            Err(SkillError::Failed { kind, .. }) => kind.status_tag(),
            Err(SkillError::NotFound(_)) => "executor_error",
        };
        self.calls.with_label_values(&[name, status]).inc();
        result
    }

    /// Render the tool-documentation block injected into every agent's
    /// system prompt. Executor-routed skills come first (agents call
    /// these directly), then in-process skills; ties break by name.
    pub fn tool_documentation(&self) -> String {
        let mut docs = String::new();
        docs.push_str("You have access to the following tool functions. Call them by writing\n");
        docs.push_str("Python code blocks (```python ... ```) which will be executed in a\n");
        docs.push_str("sandbox and the output returned to you as an observation.\n\n");
        docs.push_str("AVAILABLE TOOLS:\n");

        let mut manifests: Vec<_> = self.skills.values().map(|s| s.manifest()).collect();
        manifests.sort_by_key(|m| {
            let rank = match m.target {
                ExecutionTarget::Executor => 0,
                ExecutionTarget::InProcess => 1,
            };
            (rank, m.name)
        });
        for manifest in manifests {
            let _ = writeln!(docs, "  {}", manifest.signature);
            let _ = writeln!(docs, "      {}", manifest.description);
            docs.push('\n');
        }

        docs.push_str("RULES:\n");
        docs.push_str("  - Write one code block per turn; wait for the observation before continuing.\n");
        docs.push_str("  - Use print() to output information you want to see.\n");
        docs.push_str("  - When you have gathered enough information, write your final answer\n");
        docs.push_str("    inside <result>...</result> tags. This ends your turn.\n");
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SkillErrorKind, SkillManifest, SkillPolicy};
    use serde_json::json;

    struct FailingSkill {
        manifest: SkillManifest,
        policy: SkillPolicy,
    }

    impl Skill for FailingSkill {
        fn manifest(&self) -> &SkillManifest {
            &self.manifest
        }

        fn policy(&self) -> &SkillPolicy {
            &self.policy
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: &SkillContext,
        ) -> Result<serde_json::Value, SkillError> {
            Err(SkillError::failed(SkillErrorKind::ParseError, "bad input"))
        }
    }

    fn ctx() -> SkillContext {
        SkillContext {
            workspace_ref: "ws-1".to_string(),
            job_id: "job-1".to_string(),
        }
    }

    #[test]
    fn test_lookup_of_missing_skill_fails_loudly() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let err = registry.get("no_such_skill").err().expect("must fail");
        assert!(matches!(err, SkillError::NotFound(_)));
    }

    #[test]
    fn test_execute_records_failure_status_metric() {
        let registry = SkillRegistry::new(vec![
            Arc::new(FailingSkill {
                manifest: SkillManifest {
                    name: "always_fails",
                    version: "1.0.0",
                    signature: "always_fails() -> None",
                    description: "Fails with a parse error.",
                    target: ExecutionTarget::InProcess,
                },
                policy: SkillPolicy::in_process(),
            }) as Arc<dyn Skill>,
        ])
        .expect("registry");

        let err = registry
            .execute("always_fails", json!({}), &ctx())
            .expect_err("must fail");
        assert!(matches!(
            err,
            SkillError::Failed {
                kind: SkillErrorKind::ParseError,
                ..
            }
        ));

        let families = registry.metrics().gather();
        let calls = families
            .iter()
            .find(|f| f.name() == "skill_calls_total")
            .expect("calls family");
        let metric = &calls.get_metric()[0];
        let labels: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|l| (l.name(), l.value()))
            .collect();
        assert!(labels.contains(&("skill", "always_fails")));
        assert!(labels.contains(&("status", "parse_error")));
        assert_eq!(metric.get_counter().value() as u64, 1);
    }

    #[test]
    fn test_tool_documentation_lists_executor_skills_first() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let docs = registry.tool_documentation();

        assert!(docs.starts_with("You have access to the following tool functions."));
        assert!(docs.contains("AVAILABLE TOOLS:"));
        assert!(docs.contains("RULES:"));
        assert!(docs.contains("<result>...</result>"));

        // check_policy is the only in-process skill; it must come last.
        let check_policy = docs.find("check_policy").expect("check_policy entry");
        for name in [
            "apply_patch",
            "git_diff",
            "git_status",
            "list_files",
            "read_file",
            "run_command",
            "search_code",
            "write_file",
        ] {
            let pos = docs.find(name).expect("executor entry");
            assert!(pos < check_policy, "{name} must precede check_policy");
        }
    }

    #[test]
    fn test_tool_documentation_entry_layout() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let docs = registry.tool_documentation();
        assert!(docs.contains("  read_file(path: str) -> str\n"));
        assert!(docs.contains("      Read a file relative to the workspace root."));
    }
}
