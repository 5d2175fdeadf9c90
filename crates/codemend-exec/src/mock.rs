//! Recording mock for tests and examples.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::{ExecError, RunCodeResult, WorkspaceApi};

/// One observed call against the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceCall {
    Create {
        workspace_ref: String,
        repo_url: String,
        git_ref: String,
    },
    Snapshot {
        workspace_ref: String,
    },
    Restore {
        workspace_ref: String,
        snapshot_key: String,
    },
    RunCode {
        workspace_ref: String,
        timeout_sec: u64,
    },
    Delete {
        workspace_ref: String,
    },
}

/// Workspace mock that records every call and returns scripted run-code
/// results (a successful empty run when the script is exhausted).
pub struct RecordingWorkspace {
    calls: Mutex<Vec<WorkspaceCall>>,
    run_results: Mutex<VecDeque<Result<RunCodeResult, ExecError>>>,
    snapshot_seq: AtomicU32,
    fail_create: AtomicBool,
}

impl RecordingWorkspace {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            run_results: Mutex::new(VecDeque::new()),
            snapshot_seq: AtomicU32::new(0),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Make the next create_workspace call fail (clone failure scenario).
    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Queue a scripted run-code outcome.
    pub fn push_run_result(&self, result: Result<RunCodeResult, ExecError>) {
        self.run_results
            .lock()
            .expect("run results lock")
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<WorkspaceCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, matcher: fn(&WorkspaceCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matcher(c)).count()
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, WorkspaceCall::Create { .. }))
    }

    pub fn snapshot_count(&self) -> usize {
        self.count(|c| matches!(c, WorkspaceCall::Snapshot { .. }))
    }

    pub fn restore_count(&self) -> usize {
        self.count(|c| matches!(c, WorkspaceCall::Restore { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, WorkspaceCall::Delete { .. }))
    }

    fn record(&self, call: WorkspaceCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl Default for RecordingWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WorkspaceApi for RecordingWorkspace {
    async fn create_workspace(
        &self,
        workspace_ref: &str,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<(), ExecError> {
        self.record(WorkspaceCall::Create {
            workspace_ref: workspace_ref.to_string(),
            repo_url: repo_url.to_string(),
            git_ref: git_ref.to_string(),
        });
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(ExecError::Status {
                op: "create_workspace",
                status: 500,
                body: "clone failed".to_string(),
            });
        }
        Ok(())
    }

    async fn snapshot_workspace(&self, workspace_ref: &str) -> Result<String, ExecError> {
        self.record(WorkspaceCall::Snapshot {
            workspace_ref: workspace_ref.to_string(),
        });
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("snap-{seq}"))
    }

    async fn restore_workspace(
        &self,
        workspace_ref: &str,
        snapshot_key: &str,
    ) -> Result<(), ExecError> {
        self.record(WorkspaceCall::Restore {
            workspace_ref: workspace_ref.to_string(),
            snapshot_key: snapshot_key.to_string(),
        });
        Ok(())
    }

    async fn run_code(
        &self,
        workspace_ref: &str,
        _code: &str,
        timeout_sec: u64,
    ) -> Result<RunCodeResult, ExecError> {
        self.record(WorkspaceCall::RunCode {
            workspace_ref: workspace_ref.to_string(),
            timeout_sec,
        });
        if let Some(result) = self
            .run_results
            .lock()
            .expect("run results lock")
            .pop_front()
        {
            return result;
        }
        Ok(RunCodeResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_sec: 0.0,
            error_type: None,
        })
    }

    async fn delete_workspace(&self, workspace_ref: &str) -> Result<(), ExecError> {
        self.record(WorkspaceCall::Delete {
            workspace_ref: workspace_ref.to_string(),
        });
        Ok(())
    }
}
