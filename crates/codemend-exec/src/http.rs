//! HTTP client for the execution service.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{ExecError, RunCodeResult, WorkspaceApi};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);
/// Wall-clock headroom over the sandbox's own run-code deadline.
const RUN_CODE_HEADROOM_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    snapshot_key: String,
    #[serde(default)]
    size_bytes: u64,
}

/// Reqwest-backed client for the five executor endpoints.
pub struct HttpWorkspaceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkspaceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExecError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExecError::Transport {
                op: "client_build",
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_json(
        &self,
        op: &'static str,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ExecError::Transport {
                op,
                message: e.to_string(),
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ExecError::Transport {
            op,
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(ExecError::Status {
                op,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl WorkspaceApi for HttpWorkspaceClient {
    async fn create_workspace(
        &self,
        workspace_ref: &str,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<(), ExecError> {
        info!(workspace_ref, repo_url, git_ref, "creating workspace");
        self.post_json(
            "create_workspace",
            "/workspace/create",
            &json!({
                "workspace_ref": workspace_ref,
                "repo_url": repo_url,
                "git_ref": git_ref,
            }),
            DEFAULT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn snapshot_workspace(&self, workspace_ref: &str) -> Result<String, ExecError> {
        info!(workspace_ref, "snapshotting workspace");
        let body = self
            .post_json(
                "snapshot_workspace",
                "/workspace/snapshot",
                &json!({ "workspace_ref": workspace_ref }),
                DEFAULT_TIMEOUT,
            )
            .await?;
        let parsed: SnapshotResponse =
            serde_json::from_str(&body).map_err(|e| ExecError::Decode {
                op: "snapshot_workspace",
                message: e.to_string(),
            })?;
        info!(
            snapshot_key = %parsed.snapshot_key,
            size_bytes = parsed.size_bytes,
            "snapshot created"
        );
        Ok(parsed.snapshot_key)
    }

    async fn restore_workspace(
        &self,
        workspace_ref: &str,
        snapshot_key: &str,
    ) -> Result<(), ExecError> {
        info!(workspace_ref, snapshot_key, "restoring workspace");
        self.post_json(
            "restore_workspace",
            "/workspace/restore",
            &json!({
                "workspace_ref": workspace_ref,
                "snapshot_key": snapshot_key,
            }),
            DEFAULT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn run_code(
        &self,
        workspace_ref: &str,
        code: &str,
        timeout_sec: u64,
    ) -> Result<RunCodeResult, ExecError> {
        let body = self
            .post_json(
                "run_code",
                "/workspace/run_code",
                &json!({
                    "code": code,
                    "workspace_ref": workspace_ref,
                    "timeout_sec": timeout_sec,
                }),
                Duration::from_secs(timeout_sec + RUN_CODE_HEADROOM_SECS),
            )
            .await?;
        serde_json::from_str(&body).map_err(|e| ExecError::Decode {
            op: "run_code",
            message: e.to_string(),
        })
    }

    async fn delete_workspace(&self, workspace_ref: &str) -> Result<(), ExecError> {
        info!(workspace_ref, "deleting workspace");
        let response = self
            .client
            .delete(format!("{}/workspace/{}", self.base_url, workspace_ref))
            .timeout(DELETE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ExecError::Transport {
                op: "delete_workspace",
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecError::Status {
                op: "delete_workspace",
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
