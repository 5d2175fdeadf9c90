//! Run-code result DTO and observation formatting.

use serde::{Deserialize, Serialize};

/// Distinguished error reported by the sandbox inside a run-code result.
///
/// A policy violation is merely an observation to the agent, not a
/// step-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorKind {
    Timeout,
    PolicyViolation,
}

impl RunErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunErrorKind::Timeout => "TIMEOUT",
            RunErrorKind::PolicyViolation => "POLICY_VIOLATION",
        }
    }
}

/// Response from POST /workspace/run_code.
///
/// Field names match the execution service wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCodeResult {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub elapsed_sec: f64,
    #[serde(default)]
    pub error_type: Option<RunErrorKind>,
}

impl RunCodeResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Format as the observation string the agent reads on its next turn.
    ///
    /// Must stay in sync with the execution service's own formatter so
    /// both sides render identical observations for identical results.
    pub fn to_observation(&self) -> String {
        let mut out = String::new();
        if !self.stdout.trim().is_empty() {
            out.push_str("stdout:\n");
            out.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str("stderr:\n");
            out.push_str(self.stderr.trim_end());
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        out.push_str(&format!("\n\nexit_code: {}", self.exit_code));
        if let Some(kind) = self.error_type {
            out.push_str(&format!("\nerror_type: {}", kind.as_str()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> RunCodeResult {
        RunCodeResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            elapsed_sec: 0.1,
            error_type: None,
        }
    }

    #[test]
    fn test_observation_with_stdout_only() {
        let obs = result(0, "hello\n", "").to_observation();
        assert_eq!(obs, "stdout:\nhello\n\nexit_code: 0");
    }

    #[test]
    fn test_observation_with_both_streams() {
        let obs = result(1, "out\n", "boom\n").to_observation();
        assert_eq!(obs, "stdout:\nout\n\nstderr:\nboom\n\nexit_code: 1");
    }

    #[test]
    fn test_observation_with_no_output() {
        let obs = result(0, "", "  \n").to_observation();
        assert_eq!(obs, "(no output)\n\nexit_code: 0");
    }

    #[test]
    fn test_observation_with_error_type() {
        let mut res = result(124, "", "killed");
        res.error_type = Some(RunErrorKind::Timeout);
        let obs = res.to_observation();
        assert_eq!(obs, "stderr:\nkilled\n\nexit_code: 124\nerror_type: TIMEOUT");
    }

    #[test]
    fn test_observation_is_deterministic() {
        let a = result(0, "same", "").to_observation();
        let b = result(0, "same", "").to_observation();
        assert_eq!(a, b);
    }

    #[test]
    fn test_error_type_decodes_from_wire_form() {
        let raw = r#"{"exit_code":1,"stdout":"","stderr":"denied","elapsed_sec":0.0,"error_type":"POLICY_VIOLATION"}"#;
        let decoded: RunCodeResult = serde_json::from_str(raw).expect("decode");
        assert_eq!(decoded.error_type, Some(RunErrorKind::PolicyViolation));
    }

    #[test]
    fn test_null_error_type_decodes_as_none() {
        let raw = r#"{"exit_code":0,"stdout":"ok","stderr":"","elapsed_sec":0.2,"error_type":null}"#;
        let decoded: RunCodeResult = serde_json::from_str(raw).expect("decode");
        assert!(decoded.error_type.is_none());
    }
}
