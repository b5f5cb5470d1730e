//! Configuration types and validation for the Manager.
//!
//! `ManagerConfig` is deserialized from `manager.toml` and may be overridden
//! by CLI flags before `validate()` runs at startup.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The literal token rejected in `authorized_tokens` when running in
/// production, to stop operators from shipping the documentation example.
pub const DEFAULT_TOKEN_LITERAL: &str = "default-manager-token";

/// Manager configuration loaded from `manager.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    #[serde(default = "default_manager_port")]
    pub manager_port: u16,

    /// The Manager's own externally-reachable base URL, used to build the
    /// `completion_callback` passed to runners on dispatch. Falls back to
    /// `http://127.0.0.1:{manager_port}` when unset, which only works for
    /// same-host runners (local dev / tests).
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Tokens accepted on `X-API-Token` / `Authorization: Bearer` for
    /// client-facing endpoints.
    pub authorized_tokens: HashSet<String>,

    /// Admin Basic-auth users, mapping username to a bcrypt password hash.
    #[serde(default)]
    pub admin_users: HashMap<String, String>,

    #[serde(default = "default_cors_allow_origins")]
    pub cors_allow_origins: Vec<String>,
    #[serde(default = "default_cors_allow_credentials")]
    pub cors_allow_credentials: bool,
    #[serde(default = "default_cors_allow_methods")]
    pub cors_allow_methods: Vec<String>,
    #[serde(default = "default_cors_allow_headers")]
    pub cors_allow_headers: Vec<String>,

    #[serde(default = "default_log_directory")]
    pub log_directory: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_runners_storage_enabled")]
    pub runners_storage_enabled: bool,
    #[serde(default = "default_runners_storage_path")]
    pub runners_storage_path: String,

    #[serde(default = "default_task_store_path")]
    pub task_store_path: String,

    #[serde(default = "default_shared_storage_enabled")]
    pub shared_storage_enabled: bool,
    #[serde(default = "default_shared_storage_root")]
    pub shared_storage_root: String,

    #[serde(default = "default_heartbeat_dead_after")]
    pub heartbeat_dead_after: u64,
    #[serde(default = "default_heartbeat_sweep_interval")]
    pub heartbeat_sweep_interval: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: u64,
    #[serde(default = "default_dispatch_retry_delay")]
    pub dispatch_retry_delay: u64,
    #[serde(default = "default_dispatch_max_attempts")]
    pub dispatch_max_attempts: u32,

    #[serde(default = "default_execution_timeout")]
    pub execution_timeout: u64,
    #[serde(default = "default_timeout_sweep_interval")]
    pub timeout_sweep_interval: u64,

    #[serde(default = "default_notify_max_retries")]
    pub notify_max_retries: u32,
    #[serde(default = "default_notify_retry_delay")]
    pub notify_retry_delay: u64,
    #[serde(default = "default_notify_backoff_factor")]
    pub notify_backoff_factor: f64,

    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: u64,

    /// Allows `source_url`/`notify_url` to resolve to private/loopback
    /// addresses. Must stay `false` outside of tests.
    #[serde(default = "default_ssrf_allow_private")]
    pub ssrf_allow_private: bool,

    #[serde(default = "default_redispatch_pending_on_startup")]
    pub redispatch_pending_on_startup: bool,
}

impl ManagerConfig {
    /// The base URL to embed as `completion_callback` when dispatching to
    /// runners: the configured `public_base_url`, or a same-host fallback.
    pub fn effective_public_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.manager_port))
    }

    /// Validate the configuration, returning a descriptive error on the
    /// first violated constraint.
    ///
    /// `production` gates the `default-manager-token` check: test fixtures
    /// and local development may use the literal default token, but a
    /// Manager started with `production = true` must not.
    pub fn validate(&self, production: bool) -> crate::Result<()> {
        if self.manager_port == 0 {
            return Err(
                crate::ManagerError::FatalConfig("manager_port cannot be 0".to_string()).into(),
            );
        }

        if self.authorized_tokens.is_empty() {
            return Err(crate::ManagerError::FatalConfig(
                "authorized_tokens must contain at least one token".to_string(),
            )
            .into());
        }

        if production && self.authorized_tokens.contains(DEFAULT_TOKEN_LITERAL) {
            return Err(crate::ManagerError::FatalConfig(format!(
                "authorized_tokens must not contain the literal \"{}\" in production",
                DEFAULT_TOKEN_LITERAL
            ))
            .into());
        }

        let wildcard_origin = self.cors_allow_origins.iter().any(|o| o == "*");
        if self.cors_allow_credentials && wildcard_origin {
            return Err(crate::ManagerError::FatalConfig(
                "cors_allow_credentials=true cannot be combined with cors_allow_origins=[\"*\"]"
                    .to_string(),
            )
            .into());
        }

        if self.log_directory.is_empty() {
            return Err(crate::ManagerError::FatalConfig(
                "log_directory cannot be empty".to_string(),
            )
            .into());
        }

        if self.task_store_path.is_empty() {
            return Err(crate::ManagerError::FatalConfig(
                "task_store_path cannot be empty".to_string(),
            )
            .into());
        }

        if self.shared_storage_enabled && self.shared_storage_root.is_empty() {
            return Err(crate::ManagerError::FatalConfig(
                "shared_storage_root cannot be empty when shared_storage_enabled is true"
                    .to_string(),
            )
            .into());
        }

        if self.heartbeat_dead_after == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "heartbeat_dead_after must be greater than 0".to_string(),
            )
            .into());
        }

        if self.heartbeat_sweep_interval == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "heartbeat_sweep_interval must be greater than 0".to_string(),
            )
            .into());
        }

        if self.ping_timeout == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "ping_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.dispatch_timeout == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "dispatch_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.dispatch_retry_delay == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "dispatch_retry_delay must be greater than 0".to_string(),
            )
            .into());
        }

        if self.execution_timeout == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "execution_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.timeout_sweep_interval == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "timeout_sweep_interval must be greater than 0".to_string(),
            )
            .into());
        }

        if self.notify_max_retries == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "notify_max_retries must be greater than 0".to_string(),
            )
            .into());
        }

        if self.notify_retry_delay == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "notify_retry_delay must be greater than 0".to_string(),
            )
            .into());
        }

        if self.notify_backoff_factor < 1.0 {
            return Err(crate::ManagerError::FatalConfig(
                "notify_backoff_factor must be >= 1.0".to_string(),
            )
            .into());
        }

        if self.graceful_shutdown_timeout == 0 {
            return Err(crate::ManagerError::FatalConfig(
                "graceful_shutdown_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        for (user, hash) in &self.admin_users {
            if user.is_empty() {
                return Err(crate::ManagerError::FatalConfig(
                    "admin_users cannot contain an empty username".to_string(),
                )
                .into());
            }
            if hash.is_empty() {
                return Err(crate::ManagerError::FatalConfig(format!(
                    "admin_users entry for '{}' has an empty password hash",
                    user
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Log the effective configuration at DEBUG, redacting secrets the way
    /// the donor config loader redacts `api_key`.
    pub fn log_debug(&self) {
        tracing::debug!(
            manager_port = self.manager_port,
            public_base_url = %self.effective_public_base_url(),
            authorized_tokens = "<redacted>",
            admin_users = self.admin_users.len(),
            cors_allow_origins = ?self.cors_allow_origins,
            cors_allow_credentials = self.cors_allow_credentials,
            log_directory = %self.log_directory,
            log_level = %self.log_level,
            task_store_path = %self.task_store_path,
            shared_storage_enabled = self.shared_storage_enabled,
            heartbeat_dead_after = self.heartbeat_dead_after,
            heartbeat_sweep_interval = self.heartbeat_sweep_interval,
            ping_timeout = self.ping_timeout,
            dispatch_timeout = self.dispatch_timeout,
            dispatch_retry_delay = self.dispatch_retry_delay,
            dispatch_max_attempts = self.dispatch_max_attempts,
            execution_timeout = self.execution_timeout,
            timeout_sweep_interval = self.timeout_sweep_interval,
            notify_max_retries = self.notify_max_retries,
            notify_retry_delay = self.notify_retry_delay,
            notify_backoff_factor = self.notify_backoff_factor,
            graceful_shutdown_timeout = self.graceful_shutdown_timeout,
            ssrf_allow_private = self.ssrf_allow_private,
            redispatch_pending_on_startup = self.redispatch_pending_on_startup,
            "effective manager configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ManagerConfig {
        ManagerConfig {
            manager_port: 8080,
            public_base_url: None,
            authorized_tokens: HashSet::from(["test-token".to_string()]),
            admin_users: HashMap::new(),
            cors_allow_origins: vec!["*".to_string()],
            cors_allow_credentials: false,
            cors_allow_methods: default_cors_allow_methods(),
            cors_allow_headers: default_cors_allow_headers(),
            log_directory: "/tmp/manager-logs".to_string(),
            log_level: "info".to_string(),
            runners_storage_enabled: false,
            runners_storage_path: default_runners_storage_path(),
            task_store_path: "/tmp/manager-tasks".to_string(),
            shared_storage_enabled: false,
            shared_storage_root: default_shared_storage_root(),
            heartbeat_dead_after: 180,
            heartbeat_sweep_interval: 30,
            ping_timeout: 5,
            dispatch_timeout: 30,
            dispatch_retry_delay: 15,
            dispatch_max_attempts: 0,
            execution_timeout: 3600,
            timeout_sweep_interval: 60,
            notify_max_retries: 5,
            notify_retry_delay: 60,
            notify_backoff_factor: 1.5,
            graceful_shutdown_timeout: 30,
            ssrf_allow_private: false,
            redispatch_pending_on_startup: true,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate(false).is_ok());
    }

    #[test]
    fn test_empty_tokens_rejected() {
        let mut cfg = base_config();
        cfg.authorized_tokens.clear();
        assert!(cfg.validate(false).is_err());
    }

    #[test]
    fn test_default_token_rejected_in_production() {
        let mut cfg = base_config();
        cfg.authorized_tokens.insert(DEFAULT_TOKEN_LITERAL.to_string());
        assert!(cfg.validate(true).is_err());
        // ...but allowed outside production (e.g. local dev fixtures).
        assert!(cfg.validate(false).is_ok());
    }

    #[test]
    fn test_wildcard_cors_with_credentials_rejected() {
        let mut cfg = base_config();
        cfg.cors_allow_credentials = true;
        cfg.cors_allow_origins = vec!["*".to_string()];
        assert!(cfg.validate(false).is_err());
    }

    #[test]
    fn test_wildcard_cors_without_credentials_allowed() {
        let mut cfg = base_config();
        cfg.cors_allow_credentials = false;
        cfg.cors_allow_origins = vec!["*".to_string()];
        assert!(cfg.validate(false).is_ok());
    }

    #[test]
    fn test_zero_backoff_factor_rejected() {
        let mut cfg = base_config();
        cfg.notify_backoff_factor = 0.5;
        assert!(cfg.validate(false).is_err());
    }

    #[test]
    fn test_toml_round_trip_applies_defaults() {
        let toml_str = r#"
            authorized_tokens = ["abc123"]
        "#;
        let cfg: ManagerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.manager_port, default_manager_port());
        assert_eq!(cfg.heartbeat_dead_after, default_heartbeat_dead_after());
        assert!(cfg.validate(false).is_ok());
    }
}
