//! Typed adapter to the sandboxed execution service.
//!
//! The service exposes five JSON endpoints for workspace lifecycle and
//! code execution; this crate wraps them behind the `WorkspaceApi` trait
//! so the engine can run against the real service or a recording mock.

mod http;
mod mock;
mod result;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpWorkspaceClient;
pub use mock::{RecordingWorkspace, WorkspaceCall};
pub use result::{RunCodeResult, RunErrorKind};

/// Execution-service errors.
///
/// Any non-2xx status or transport failure is a distinguished executor
/// error; the engine treats it as a transient step-level failure except
/// in the Implementer snapshot prolog, where it is logged and swallowed.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("executor transport error during {op}: {message}")]
    Transport { op: &'static str, message: String },
    #[error("executor returned HTTP {status} during {op}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },
    #[error("executor response decode error during {op}: {message}")]
    Decode { op: &'static str, message: String },
}

/// Workspace lifecycle and code execution, as seen by the control plane.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Clone a git repository into a new workspace.
    async fn create_workspace(
        &self,
        workspace_ref: &str,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<(), ExecError>;

    /// Snapshot the workspace; the returned key enables a later restore.
    async fn snapshot_workspace(&self, workspace_ref: &str) -> Result<String, ExecError>;

    /// Roll the workspace back to a previously taken snapshot.
    async fn restore_workspace(
        &self,
        workspace_ref: &str,
        snapshot_key: &str,
    ) -> Result<(), ExecError>;

    /// Execute a code action in the sandbox.
    async fn run_code(
        &self,
        workspace_ref: &str,
        code: &str,
        timeout_sec: u64,
    ) -> Result<RunCodeResult, ExecError>;

    /// Delete a workspace once its job reaches a terminal state.
    async fn delete_workspace(&self, workspace_ref: &str) -> Result<(), ExecError>;
}
