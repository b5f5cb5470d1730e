//! Runner Registry: the in-memory set of known runners, keyed by canonical
//! URL, with heartbeat tracking, a version gate, and a liveness sweeper.

use dashmap::DashMap;
use shared::model::{Runner, RunnerStatus};
use shared::utils::current_timestamp;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a `register` or `heartbeat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Ok,
    VersionMismatch { expected: String, got: String },
    Unknown,
}

/// The Manager's own MAJOR.MINOR.PATCH version, parsed once at startup from
/// `CARGO_PKG_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().unwrap_or(0);
        Some(Self { major, minor, patch })
    }

    fn major_minor_eq(&self, other: &SemVer) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

/// In-memory registry of known runners, sharded (internally, by `DashMap`)
/// to satisfy the "striped lock table keyed by URL" requirement without a
/// hand-rolled stripe array.
pub struct RunnerRegistry {
    runners: DashMap<String, Runner>,
    manager_version: SemVer,
}

impl RunnerRegistry {
    pub fn new(manager_version_str: &str) -> Self {
        let manager_version = SemVer::parse(manager_version_str)
            .unwrap_or(SemVer { major: 0, minor: 0, patch: 0 });
        Self {
            runners: DashMap::new(),
            manager_version,
        }
    }

    /// Register a runner, rejecting a version whose MAJOR.MINOR differs from
    /// the Manager's own.
    pub fn register(
        &self,
        url: String,
        name: String,
        token: String,
        version: String,
        task_types: Vec<String>,
    ) -> GateOutcome {
        let runner_version = match SemVer::parse(&version) {
            Some(v) => v,
            None => {
                warn!(url = %url, version = %version, "runner presented an unparseable version");
                return GateOutcome::VersionMismatch {
                    expected: self.version_string(),
                    got: version,
                };
            }
        };

        if !runner_version.major_minor_eq(&self.manager_version) {
            warn!(
                url = %url,
                runner_version = %version,
                manager_version = %self.version_string(),
                "runner registration rejected: version mismatch"
            );
            return GateOutcome::VersionMismatch {
                expected: self.version_string(),
                got: version,
            };
        }

        let now = current_timestamp();
        self.runners.insert(
            url.clone(),
            Runner {
                url,
                name,
                token,
                version,
                task_types,
                registered_at: now,
                last_heartbeat_at: now,
                status: RunnerStatus::Registered,
            },
        );

        GateOutcome::Ok
    }

    /// Refresh a runner's heartbeat, re-validating the version gate.
    pub fn heartbeat(&self, url: &str, version: &str) -> GateOutcome {
        let runner_version = match SemVer::parse(version) {
            Some(v) => v,
            None => {
                return GateOutcome::VersionMismatch {
                    expected: self.version_string(),
                    got: version.to_string(),
                }
            }
        };

        if !runner_version.major_minor_eq(&self.manager_version) {
            warn!(
                url = %url,
                runner_version = %version,
                manager_version = %self.version_string(),
                "heartbeat rejected: version mismatch"
            );
            return GateOutcome::VersionMismatch {
                expected: self.version_string(),
                got: version.to_string(),
            };
        }

        match self.runners.get_mut(url) {
            Some(mut entry) => {
                entry.last_heartbeat_at = current_timestamp();
                entry.version = version.to_string();
                entry.status = RunnerStatus::Registered;
                GateOutcome::Ok
            }
            None => GateOutcome::Unknown,
        }
    }

    pub fn unregister(&self, url: &str) {
        if let Some(mut entry) = self.runners.get_mut(url) {
            entry.status = RunnerStatus::Removed;
        }
    }

    /// Snapshot of every known runner (including `unreachable`/`removed`),
    /// for `/runner/list`.
    pub fn list(&self) -> Vec<Runner> {
        self.runners.iter().map(|e| e.value().clone()).collect()
    }

    /// Deterministic, stable ordering of currently `registered` runners
    /// advertising `task_type`: by `registered_at` ascending, tie-broken by
    /// URL lexicographic order.
    pub fn find_eligible(&self, task_type: &str) -> Vec<Runner> {
        let mut candidates: Vec<Runner> = self
            .runners
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| {
                r.status == RunnerStatus::Registered
                    && r.task_types.iter().any(|t| t == task_type)
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.url.cmp(&b.url))
        });

        candidates
    }

    pub fn get(&self, url: &str) -> Option<Runner> {
        self.runners.get(url).map(|e| e.value().clone())
    }

    fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            self.manager_version.major, self.manager_version.minor, self.manager_version.patch
        )
    }

    /// Mark any runner whose `last_heartbeat_at` is older than
    /// `heartbeat_dead_after` as `unreachable`. Called by the liveness
    /// sweeper.
    pub fn sweep_unreachable(&self, heartbeat_dead_after: u64) {
        let now = current_timestamp();
        for mut entry in self.runners.iter_mut() {
            if entry.status == RunnerStatus::Registered
                && now.saturating_sub(entry.last_heartbeat_at) > heartbeat_dead_after
            {
                warn!(url = %entry.url, "runner marked unreachable: heartbeat expired");
                entry.status = RunnerStatus::Unreachable;
            }
        }
    }
}

/// Spawn the background liveness sweeper. Returns the task handle; the
/// caller is responsible for aborting/joining it on shutdown via
/// `shutdown_rx`.
pub fn spawn_liveness_sweeper(
    registry: Arc<RunnerRegistry>,
    sweep_interval: u64,
    heartbeat_dead_after: u64,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    registry.sweep_unreachable(heartbeat_dead_after);
                }
                _ = shutdown_rx.recv() => {
                    info!("runner liveness sweeper received shutdown signal");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RunnerRegistry {
        RunnerRegistry::new("1.2.0")
    }

    #[test]
    fn test_register_accepts_matching_minor() {
        let reg = registry();
        let outcome = reg.register(
            "http://runner1:9000".to_string(),
            "runner1".to_string(),
            "tok".to_string(),
            "1.2.5".to_string(),
            vec!["encoding".to_string()],
        );
        assert_eq!(outcome, GateOutcome::Ok);
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn test_register_rejects_minor_mismatch() {
        let reg = registry();
        let outcome = reg.register(
            "http://runner1:9000".to_string(),
            "runner1".to_string(),
            "tok".to_string(),
            "1.3.0".to_string(),
            vec!["encoding".to_string()],
        );
        assert!(matches!(outcome, GateOutcome::VersionMismatch { .. }));
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_find_eligible_orders_by_registered_at_then_url() {
        let reg = registry();
        reg.register(
            "http://b:9000".to_string(),
            "b".to_string(),
            "tok".to_string(),
            "1.2.0".to_string(),
            vec!["encoding".to_string()],
        );
        reg.register(
            "http://a:9000".to_string(),
            "a".to_string(),
            "tok".to_string(),
            "1.2.0".to_string(),
            vec!["encoding".to_string()],
        );
        let eligible = reg.find_eligible("encoding");
        assert_eq!(eligible.len(), 2);
        // Both registered "simultaneously" (same second) in this fast test,
        // so URL lexicographic order breaks the tie.
        assert_eq!(eligible[0].url, "http://a:9000");
    }

    #[test]
    fn test_find_eligible_excludes_unreachable() {
        let reg = registry();
        reg.register(
            "http://a:9000".to_string(),
            "a".to_string(),
            "tok".to_string(),
            "1.2.0".to_string(),
            vec!["encoding".to_string()],
        );
        // Force the heartbeat clearly into the past so the sweep's
        // strict `>` comparison fires regardless of wall-clock second
        // boundaries.
        reg.runners.get_mut("http://a:9000").unwrap().last_heartbeat_at = 0;
        reg.sweep_unreachable(60);
        assert!(reg.find_eligible("encoding").is_empty());
    }

    #[test]
    fn test_heartbeat_unknown_runner() {
        let reg = registry();
        let outcome = reg.heartbeat("http://ghost:9000", "1.2.0");
        assert_eq!(outcome, GateOutcome::Unknown);
    }
}
