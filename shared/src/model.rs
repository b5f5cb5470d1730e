//! Core domain types: Runner and Task records.
//!
//! These mirror the data model section of the design spec directly; they are
//! the records the registry and the task store hold in memory and persist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a registered Runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Registered,
    Unreachable,
    Removed,
}

/// A remote worker known to the registry, keyed by its canonical URL.
///
/// `available` and `task_types` are not carried here in the persisted sense —
/// they are transient, refreshed per-selection via `/runner/ping` by the
/// dispatcher — but the last-known advertised set is kept for `list()`
/// reporting, since an operator inspecting `/runner/list` wants to see what
/// a runner last claimed to support even between dispatch attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub version: String,
    pub task_types: Vec<String>,
    pub registered_at: u64,
    pub last_heartbeat_at: u64,
    pub status: RunnerStatus,
}

/// Status of a Task, following the state machine in the design spec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Warning,
    Failed,
    Timeout,
    Rejected,
}

impl TaskStatus {
    /// Terminal states may only leave via restart (back to `Pending`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Warning
                | TaskStatus::Failed
                | TaskStatus::Timeout
                | TaskStatus::Rejected
        )
    }
}

/// A unit of work submitted by a client, carrying its full lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,

    // Submission envelope
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

    // Assignment
    #[serde(default)]
    pub runner_url: Option<String>,
    #[serde(default)]
    pub runner_name: Option<String>,

    // Execution
    pub status: TaskStatus,
    pub run_id: String,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub script_output: Option<String>,

    // Delivery
    #[serde(default)]
    pub notify_attempts: u32,
    #[serde(default)]
    pub notify_last_error: Option<String>,
    #[serde(default)]
    pub notify_delivered_at: Option<u64>,

    // Dispatch bookkeeping (not part of the client-visible envelope, but
    // must be persisted so a restart resumes retry counting correctly).
    #[serde(default)]
    pub dispatch_attempts: u32,
}

impl Task {
    /// The `YYYY-MM-DD` day-bucket key this task belongs to, derived from
    /// `created_at` and fixed for the task's entire life.
    pub fn day_bucket_key(&self) -> String {
        crate::utils::day_bucket_key(self.created_at)
    }
}
