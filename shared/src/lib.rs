//! Shared data structures and utilities for the Manager coordination service
//!
//! This crate contains the wire-format DTOs, configuration types, error
//! taxonomy, and small cross-cutting utilities used by the `manager` binary.

pub mod api;
pub mod config;
pub mod defaults;
pub mod model;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::{endpoints, headers};
pub use config::ManagerConfig;
pub use model::{Runner, RunnerStatus, Task, TaskStatus};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy for the Manager (see the error handling design notes).
///
/// These are kinds, not HTTP status codes: the `manager` binary's HTTP layer
/// maps each variant onto a response at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("stale: completion run_id does not match current run")]
    Stale,

    #[error("runner error: {0}")]
    Runner(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules can be imported.
    }
}
