//! Default values for Manager configuration parameters
//!
//! This module centralizes all default value functions used by
//! `ManagerConfig`. These functions are used by serde when deserializing
//! configuration files that don't specify certain optional fields.

/// Default port the Manager's HTTP server binds to.
pub fn default_manager_port() -> u16 {
    8080
}

/// Default CORS allowed origins (permissive; operators are expected to
/// tighten this in production).
pub fn default_cors_allow_origins() -> Vec<String> {
    vec!["*".to_string()]
}

pub fn default_cors_allow_credentials() -> bool {
    false
}

pub fn default_cors_allow_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "OPTIONS".to_string(),
    ]
}

pub fn default_cors_allow_headers() -> Vec<String> {
    vec![
        "Content-Type".to_string(),
        "X-API-Token".to_string(),
        "X-Runner-Version".to_string(),
        "Authorization".to_string(),
    ]
}

pub fn default_log_directory() -> String {
    "/var/log/manager".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_runners_storage_enabled() -> bool {
    false
}

pub fn default_runners_storage_path() -> String {
    "/var/lib/manager/runners.json".to_string()
}

pub fn default_task_store_path() -> String {
    "/var/lib/manager/tasks".to_string()
}

pub fn default_shared_storage_enabled() -> bool {
    false
}

pub fn default_shared_storage_root() -> String {
    "/var/lib/manager/results".to_string()
}

/// Default window after which a runner with no heartbeat is marked
/// `unreachable` (180 s).
pub fn default_heartbeat_dead_after() -> u64 {
    180
}

/// Default period of the liveness sweeper (30 s).
pub fn default_heartbeat_sweep_interval() -> u64 {
    30
}

/// Default per-candidate `/runner/ping` timeout (5 s).
pub fn default_ping_timeout() -> u64 {
    5
}

/// Default `/task/run` dispatch timeout (30 s).
pub fn default_dispatch_timeout() -> u64 {
    30
}

/// Default delay between dispatch retries when no runner is available (15 s).
pub fn default_dispatch_retry_delay() -> u64 {
    15
}

/// Default maximum dispatch attempts before giving up (0 = unbounded).
pub fn default_dispatch_max_attempts() -> u32 {
    0
}

/// Default execution timeout before a `running` task is force-timed-out
/// (5 hours).
pub fn default_execution_timeout() -> u64 {
    5 * 3600
}

/// Default period of the task-timeout sweeper (60 s).
pub fn default_timeout_sweep_interval() -> u64 {
    60
}

/// Default maximum notify attempts (5).
pub fn default_notify_max_retries() -> u32 {
    5
}

/// Default notify base backoff delay (60 s).
pub fn default_notify_retry_delay() -> u64 {
    60
}

/// Default notify backoff multiplier (1.5).
pub fn default_notify_backoff_factor() -> f64 {
    1.5
}

/// Default graceful shutdown timeout (30 s).
pub fn default_graceful_shutdown_timeout() -> u64 {
    30
}

/// SSRF guard default: reject private/loopback/link-local hosts unless a
/// test explicitly opts out.
pub fn default_ssrf_allow_private() -> bool {
    false
}

/// Default: re-dispatch tasks still `pending` at startup.
pub fn default_redispatch_pending_on_startup() -> bool {
    true
}
