//! Result Access: dual-mode manifest/file retrieval, selected per-deployment
//! by `shared_storage_enabled`.

use crate::registry::RunnerRegistry;
use crate::runner_client::RunnerClient;
use futures_util::TryStreamExt;
use shared::model::Task;
use shared::utils::resolve_within;
use shared::{ManagerConfig, ManagerError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ResultAccess {
    config: Arc<ManagerConfig>,
    client: RunnerClient,
    registry: Arc<RunnerRegistry>,
}

/// A file ready to stream to the client: either a local path or a proxied
/// upstream response, normalised so the API layer doesn't need to know
/// which mode produced it.
pub enum ResultFile {
    Local { path: PathBuf },
    Proxied { response: reqwest::Response },
}

impl ResultAccess {
    pub fn new(config: Arc<ManagerConfig>, client: RunnerClient, registry: Arc<RunnerRegistry>) -> Self {
        Self { config, client, registry }
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        Path::new(&self.config.shared_storage_root).join(task_id)
    }

    /// Look up the bearer token for the runner a task was dispatched to.
    /// The token lives on the Runner record (never on the Task, so it's
    /// never persisted into a day-bucket or logged alongside the task).
    fn runner_token(&self, task: &Task) -> Result<(String, String)> {
        let runner_url = task
            .runner_url
            .clone()
            .ok_or_else(|| ManagerError::NotFound(format!("task {} has no assigned runner", task.task_id)))?;
        let runner = self
            .registry
            .get(&runner_url)
            .ok_or_else(|| ManagerError::NotFound(format!("runner {} is no longer known", runner_url)))?;
        Ok((runner_url, runner.token))
    }

    /// `GET /task/result/{task_id}`: the manifest JSON.
    pub async fn get_manifest(&self, task: &Task) -> Result<serde_json::Value> {
        if self.config.shared_storage_enabled {
            let manifest_path = self.task_dir(&task.task_id).join("manifest.json");
            let content = tokio::fs::read(&manifest_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ManagerError::NotFound(format!("no manifest for task {}", task.task_id))
                } else {
                    ManagerError::Upstream(format!("failed to read manifest: {}", e))
                }
            })?;
            serde_json::from_slice(&content)
                .map_err(|e| ManagerError::Upstream(format!("manifest is not valid JSON: {}", e)).into())
        } else {
            let (runner_url, token) = self.runner_token(task)?;

            let response = self
                .client
                .get_manifest(&runner_url, &token, &task.task_id)
                .await
                .map_err(|e| ManagerError::Upstream(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ManagerError::NotFound(format!("runner has no manifest for task {}", task.task_id)).into());
            }
            if !response.status().is_success() {
                return Err(ManagerError::Upstream(format!("runner returned {}", response.status())).into());
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| ManagerError::Upstream(format!("manifest proxy response was not JSON: {}", e)).into())
        }
    }

    /// `GET /task/result/{task_id}/file/{file_path}`.
    pub async fn get_file(&self, task: &Task, file_path: &str) -> Result<ResultFile> {
        if self.config.shared_storage_enabled {
            let root = self.task_dir(&task.task_id);
            let resolved = resolve_within(&root, file_path)?;

            match tokio::fs::metadata(&resolved).await {
                Ok(_) => Ok(ResultFile::Local { path: resolved }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ManagerError::NotFound(format!("no such file for task {}", task.task_id)).into())
                }
                Err(e) => Err(ManagerError::Upstream(format!("failed to stat result file: {}", e)).into()),
            }
        } else {
            let (runner_url, token) = self.runner_token(task)?;

            let response = self
                .client
                .get_file(&runner_url, &token, &task.task_id, file_path)
                .await
                .map_err(|e| ManagerError::Upstream(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ManagerError::NotFound(format!("no such file for task {}", task.task_id)).into());
            }
            if !response.status().is_success() {
                return Err(ManagerError::Upstream(format!("runner returned {}", response.status())).into());
            }

            Ok(ResultFile::Proxied { response })
        }
    }
}

/// Convert a proxied upstream response into an axum streaming body, so the
/// bytes pass through 1:1 without buffering the whole file in memory.
pub fn proxied_body(response: reqwest::Response) -> axum::body::Body {
    axum::body::Body::from_stream(response.bytes_stream().map_err(std::io::Error::other))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_is_rejected_before_touching_disk() {
        let root = Path::new("/var/lib/manager/results/abc");
        assert!(resolve_within(root, "../../../etc/passwd").is_err());
    }
}
