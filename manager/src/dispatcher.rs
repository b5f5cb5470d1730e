//! Dispatcher: runner selection (ping + eligibility) and `POST /task/run`
//! invocation.

use crate::registry::RunnerRegistry;
use crate::runner_client::RunnerClient;
use shared::api::RunRequest;
use shared::model::Task;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The outcome of one dispatch attempt.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Dispatched { runner_url: String, runner_name: String },
    NoRunnerAvailable,
    RunnerRejected { reason: String },
}

pub struct Dispatcher {
    registry: Arc<RunnerRegistry>,
    client: RunnerClient,
    ping_timeout: Duration,
    dispatch_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RunnerRegistry>,
        client: RunnerClient,
        ping_timeout: Duration,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            ping_timeout,
            dispatch_timeout,
        }
    }

    /// Select the first eligible runner for `task.task_type` and dispatch to
    /// it. `completion_callback` is the URL the runner must call back to on
    /// finish.
    pub async fn dispatch(&self, task: &Task, completion_callback: String) -> DispatchOutcome {
        let candidates = self.registry.find_eligible(&task.task_type);

        if candidates.is_empty() {
            return DispatchOutcome::NoRunnerAvailable;
        }

        let mut last_rejection: Option<String> = None;

        for candidate in candidates {
            let ping = self
                .client
                .ping(&candidate.url, &candidate.token, self.ping_timeout)
                .await;

            let ping = match ping {
                Ok(p) => p,
                Err(e) => {
                    debug!(url = %candidate.url, error = %e, "runner ping failed, trying next candidate");
                    continue;
                }
            };

            if !ping.available || !ping.registered || !ping.task_types.iter().any(|t| t == &task.task_type) {
                debug!(url = %candidate.url, "runner not eligible at ping time, trying next candidate");
                continue;
            }

            let request = RunRequest {
                task_id: task.task_id.clone(),
                run_id: task.run_id.clone(),
                etab_name: task.etab_name.clone(),
                app_name: task.app_name.clone(),
                app_version: task.app_version.clone(),
                task_type: task.task_type.clone(),
                source_url: task.source_url.clone(),
                affiliation: task.affiliation.clone(),
                parameters: task.parameters.clone(),
                completion_callback: completion_callback.clone(),
            };

            match self
                .client
                .run(&candidate.url, &candidate.token, &request, self.dispatch_timeout)
                .await
            {
                Ok(()) => {
                    return DispatchOutcome::Dispatched {
                        runner_url: candidate.url,
                        runner_name: candidate.name,
                    };
                }
                Err(e) => {
                    warn!(url = %candidate.url, error = %e, "runner rejected dispatch, trying next candidate");
                    last_rejection = Some(e.to_string());
                    continue;
                }
            }
        }

        match last_rejection {
            Some(reason) => DispatchOutcome::RunnerRejected { reason },
            None => DispatchOutcome::NoRunnerAvailable,
        }
    }
}
