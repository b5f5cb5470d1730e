//! Wire-format request/response types for the Manager's inbound and outbound
//! HTTP surfaces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request body for `POST /task/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub etab_name: String,
    pub app_name: String,
    #[serde(default)]
    pub app_version: Option<String>,
    pub task_type: String,
    pub source_url: String,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub notify_url: Option<String>,
}

/// Response body for `POST /task/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequestResponse {
    pub task_id: String,
}

/// Response body for `GET /task/status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: crate::model::TaskStatus,
    pub runner_url: Option<String>,
    pub runner_name: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error_message: Option<String>,
}

/// Request body for `POST /task/completion` (runner-initiated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub task_id: String,
    pub status: CompletionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub script_output: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// The subset of Task statuses a runner is permitted to report on completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Warning,
    Failed,
}

impl From<CompletionStatus> for crate::model::TaskStatus {
    fn from(value: CompletionStatus) -> Self {
        match value {
            CompletionStatus::Completed => crate::model::TaskStatus::Completed,
            CompletionStatus::Warning => crate::model::TaskStatus::Warning,
            CompletionStatus::Failed => crate::model::TaskStatus::Failed,
        }
    }
}

/// Request body for `POST /runner/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub url: String,
    pub name: String,
    pub token: String,
    pub task_types: Vec<String>,
}

/// Request body for `POST /runner/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub url: String,
}

/// Request body for `POST /runner/unregister`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub url: String,
}

/// A single entry of `GET /runner/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerListEntry {
    pub url: String,
    pub name: String,
    pub version: String,
    pub status: crate::model::RunnerStatus,
    pub task_types: Vec<String>,
    pub last_heartbeat_at: u64,
}

/// Request body for `POST /tasks/restart-selected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartSelectedRequest {
    pub task_ids: Vec<String>,
}

/// Response body for `POST /tasks/restart-selected`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RestartSelectedResponse {
    pub requested: Vec<String>,
    pub restarted: Vec<String>,
    pub skipped: Vec<SkippedRestart>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRestart {
    pub task_id: String,
    pub reason: String,
}

/// Outbound `GET {runner.url}/runner/ping` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub available: bool,
    pub registered: bool,
    #[serde(default)]
    pub task_types: Vec<String>,
}

/// Outbound `POST {runner.url}/task/run` body: the submission envelope plus
/// the fields the Manager adds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub task_id: String,
    pub run_id: String,
    pub etab_name: String,
    pub app_name: String,
    #[serde(default)]
    pub app_version: Option<String>,
    pub task_type: String,
    pub source_url: String,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub completion_callback: String,
}

/// Notify webhook body delivered to a client's `notify_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub task_id: String,
    pub run_id: String,
    pub status: crate::model::TaskStatus,
    #[serde(default)]
    pub script_output: Option<String>,
}

/// Generic `{ok: true}` acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// HTTP headers used for authentication and metadata.
pub mod headers {
    pub const API_TOKEN: &str = "X-API-Token";
    pub const RUNNER_VERSION: &str = "X-Runner-Version";
}

/// API endpoint paths.
pub mod endpoints {
    pub const TASK_EXECUTE: &str = "/task/execute";
    pub const TASK_STATUS: &str = "/task/status/{id}";
    pub const TASK_RESULT: &str = "/task/result/{id}";
    pub const TASK_RESULT_FILE: &str = "/task/result/{id}/file/{path}";
    pub const TASK_COMPLETION: &str = "/task/completion";
    pub const RUNNER_REGISTER: &str = "/runner/register";
    pub const RUNNER_HEARTBEAT: &str = "/runner/heartbeat";
    pub const RUNNER_UNREGISTER: &str = "/runner/unregister";
    pub const RUNNER_LIST: &str = "/runner/list";
    pub const TASKS_RESTART_SELECTED: &str = "/tasks/restart-selected";

    // Outbound (Manager -> Runner) paths, relative to the runner's base URL.
    pub const RUNNER_PING: &str = "/runner/ping";
    pub const RUNNER_TASK_RUN: &str = "/task/run";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_status_maps_to_task_status() {
        assert_eq!(
            crate::model::TaskStatus::from(CompletionStatus::Completed),
            crate::model::TaskStatus::Completed
        );
        assert_eq!(
            crate::model::TaskStatus::from(CompletionStatus::Failed),
            crate::model::TaskStatus::Failed
        );
    }

    #[test]
    fn test_ack_helper() {
        let ack = Ack::ok();
        assert!(ack.ok);
    }

    #[test]
    fn test_task_request_round_trip() {
        let req = TaskRequest {
            etab_name: "example-univ".to_string(),
            app_name: "studio".to_string(),
            app_version: None,
            task_type: "encoding".to_string(),
            source_url: "http://example/a.mp4".to_string(),
            affiliation: None,
            parameters: BTreeMap::new(),
            notify_url: Some("http://client/hook".to_string()),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: TaskRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_type, "encoding");
    }
}
