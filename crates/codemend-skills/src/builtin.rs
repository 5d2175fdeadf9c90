//! The built-in skill set.
//!
//! Eight executor-routed tools cover workspace I/O, git operations, and
//! command execution inside the sandbox; `check_policy` runs in-process
//! and vets a unified diff against hard rules an agent might miss or be
//! convinced to waive.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{json, Value};

use crate::{
    ExecutionTarget, Skill, SkillContext, SkillError, SkillErrorKind, SkillManifest, SkillPolicy,
};

/// Maximum changed lines before a patch is considered too large.
const MAX_PATCH_LOC: usize = 300;

/// A skill whose body lives in the execution sandbox. Its execute is
/// never reached through the registry; agents invoke it by emitting
/// code blocks.
struct ExecutorSkill {
    manifest: SkillManifest,
    policy: SkillPolicy,
}

impl Skill for ExecutorSkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    fn policy(&self) -> &SkillPolicy {
        &self.policy
    }

    fn execute(&self, _input: Value, _ctx: &SkillContext) -> Result<Value, SkillError> {
        Err(SkillError::failed(
            SkillErrorKind::ExecutorError,
            format!("{} is invoked via the sandbox", self.manifest.name),
        ))
    }
}

fn executor_skill(
    name: &'static str,
    signature: &'static str,
    description: &'static str,
    policy: SkillPolicy,
) -> Arc<dyn Skill> {
    Arc::new(ExecutorSkill {
        manifest: SkillManifest {
            name,
            version: "1.0.0",
            signature,
            description,
            target: ExecutionTarget::Executor,
        },
        policy,
    })
}

/// In-process skill that checks a unified diff for policy violations.
///
/// Checks:
/// - no disabled-test markers on added lines
/// - no secret-looking assignments on added lines
/// - total changed lines within the configured limit
struct CheckPolicySkill {
    manifest: SkillManifest,
    policy: SkillPolicy,
}

fn disabled_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\+.*(@(Ignore|Disabled)\b|#\[ignore\])").expect("disabled-test pattern")
    })
}

fn secret_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)^\+.*(password|api.?key|secret|token)\s*=\s*["'][^"']{4,}["']"#)
            .expect("secret pattern")
    })
}

impl Skill for CheckPolicySkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    fn policy(&self) -> &SkillPolicy {
        &self.policy
    }

    fn execute(&self, input: Value, _ctx: &SkillContext) -> Result<Value, SkillError> {
        let Some(diff) = input.get("diff").and_then(Value::as_str) else {
            return Err(SkillError::failed(
                SkillErrorKind::ParseError,
                "check_policy input must be an object with a 'diff' string",
            ));
        };
        if diff.trim().is_empty() {
            return Ok(json!({
                "approved": false,
                "violations": ["Empty diff"],
                "lines_added": 0,
                "lines_removed": 0,
            }));
        }

        let mut violations: Vec<String> = Vec::new();
        let mut added = 0usize;
        let mut removed = 0usize;

        for line in diff.lines() {
            if line.starts_with('+') && !line.starts_with("+++") {
                added += 1;
                if disabled_test_re().is_match(line) {
                    violations.push(format!("Disabled test marker found: {}", line.trim()));
                }
                if secret_re().is_match(line) {
                    violations.push(format!("Potential secret in added code: {}", line.trim()));
                }
            } else if line.starts_with('-') && !line.starts_with("---") {
                removed += 1;
            }
        }

        let total = added + removed;
        if total > MAX_PATCH_LOC {
            violations.push(format!("Patch is {total} LOC (limit: {MAX_PATCH_LOC})"));
        }

        Ok(json!({
            "approved": violations.is_empty(),
            "violations": violations,
            "lines_added": added,
            "lines_removed": removed,
        }))
    }
}

/// The full skill set registered at process start.
pub fn builtin_skills() -> Vec<Arc<dyn Skill>> {
    vec![
        executor_skill(
            "read_file",
            "read_file(path: str) -> str",
            "Read a file relative to the workspace root.",
            SkillPolicy::read_only(30),
        ),
        executor_skill(
            "write_file",
            "write_file(path: str, content: str) -> None",
            "Write content to a file (creates parent dirs automatically).",
            SkillPolicy::write_allowed(30),
        ),
        executor_skill(
            "list_files",
            "list_files(path: str = \".\", pattern: str = \"**/*\") -> list[str]",
            "List files matching a glob pattern under path.",
            SkillPolicy::read_only(30),
        ),
        executor_skill(
            "search_code",
            "search_code(pattern: str, path: str = \".\") -> list[dict]",
            "Search for a regex pattern using ripgrep. Returns [{file, line, text}, ...].",
            SkillPolicy::read_only(30),
        ),
        executor_skill(
            "git_status",
            "git_status() -> str",
            "Show the current git status of the workspace.",
            SkillPolicy::read_only(30),
        ),
        executor_skill(
            "git_diff",
            "git_diff(base: str = \"HEAD\") -> str",
            "Show the unified diff vs base.",
            SkillPolicy::read_only(30),
        ),
        executor_skill(
            "apply_patch",
            "apply_patch(diff: str) -> dict",
            "Apply a unified diff to the workspace using git apply. Returns {exit_code, stdout, stderr, success}.",
            SkillPolicy::write_allowed(30),
        ),
        executor_skill(
            "run_command",
            "run_command(cmd: list[str], timeout: int = 300) -> dict",
            "Run an allowlisted command (build tools, git, rg). Returns {exit_code, stdout, stderr}.",
            SkillPolicy::write_allowed(300),
        ),
        Arc::new(CheckPolicySkill {
            manifest: SkillManifest {
                name: "check_policy",
                version: "1.0.0",
                signature: "check_policy(diff: str) -> PolicyReport",
                description: "Check a unified diff for policy violations: disabled tests, secrets, oversized patches.",
                target: ExecutionTarget::InProcess,
            },
            policy: SkillPolicy::in_process(),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SkillRegistry;

    fn ctx() -> SkillContext {
        SkillContext {
            workspace_ref: "ws-1".to_string(),
            job_id: "job-1".to_string(),
        }
    }

    #[test]
    fn test_builtin_set_registers_nine_skills() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        assert_eq!(registry.skill_names().len(), 9);
        assert!(registry.get("apply_patch").is_ok());
        assert!(registry.get("check_policy").is_ok());
    }

    #[test]
    fn test_executor_skill_execute_fails_loudly() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let err = registry
            .execute("apply_patch", json!({"diff": ""}), &ctx())
            .expect_err("must fail");
        assert!(matches!(
            err,
            SkillError::Failed {
                kind: SkillErrorKind::ExecutorError,
                ..
            }
        ));
    }

    #[test]
    fn test_check_policy_approves_clean_diff() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let diff = "--- a/src/lib.rs\n+++ b/src/lib.rs\n-let x = 1;\n+let x = 2;\n";
        let report = registry
            .execute("check_policy", json!({ "diff": diff }), &ctx())
            .expect("report");
        assert_eq!(report["approved"], true);
        assert_eq!(report["lines_added"], 1);
        assert_eq!(report["lines_removed"], 1);
    }

    #[test]
    fn test_check_policy_flags_disabled_tests_and_secrets() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let diff = "+    @Disabled\n+    api_key = \"sk-live-123456\"\n";
        let report = registry
            .execute("check_policy", json!({ "diff": diff }), &ctx())
            .expect("report");
        assert_eq!(report["approved"], false);
        let violations = report["violations"].as_array().expect("violations");
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_check_policy_rejects_oversized_patch() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let mut diff = String::new();
        for i in 0..301 {
            diff.push_str(&format!("+line {i}\n"));
        }
        let report = registry
            .execute("check_policy", json!({ "diff": diff }), &ctx())
            .expect("report");
        assert_eq!(report["approved"], false);
    }

    #[test]
    fn test_check_policy_rejects_blank_diff() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let report = registry
            .execute("check_policy", json!({ "diff": "  " }), &ctx())
            .expect("report");
        assert_eq!(report["approved"], false);
        assert_eq!(report["lines_added"], 0);
    }

    #[test]
    fn test_check_policy_non_object_input_is_a_parse_error() {
        let registry = SkillRegistry::with_builtins().expect("registry");
        let err = registry
            .execute("check_policy", json!("not an object"), &ctx())
            .expect_err("must fail");
        assert!(matches!(
            err,
            SkillError::Failed {
                kind: SkillErrorKind::ParseError,
                ..
            }
        ));
    }
}
