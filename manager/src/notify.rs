//! Notify Pipeline: at-least-once delivery of completion webhooks to a
//! task's `notify_url`, with bounded retries and exponential backoff.

use crate::task_store::TaskStore;
use shared::api::NotifyPayload;
use shared::utils::{current_timestamp, notify_backoff_delay_seconds};
use shared::ManagerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Bounded queue capacity for notify work, mirroring the dispatch queue's
/// backpressure design (a full queue simply drops the enqueue with a WARN
/// log — notify failures are inherently retried by the timeout/restart paths
/// that re-enqueue on their own triggers, so dropping here does not strand
/// the task in an unobservable state).
const NOTIFY_QUEUE_CAPACITY: usize = 4096;

pub struct NotifyPipeline {
    tx: mpsc::Sender<String>,
}

impl NotifyPipeline {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Enqueue a completion notification for `task_id`. Idempotent per
    /// `(task_id, run_id)` in the sense that stale attempts are dropped at
    /// delivery time, not at enqueue time (the run_id is re-read fresh from
    /// the store on each attempt).
    pub fn enqueue(&self, task_id: String) {
        if let Err(e) = self.tx.try_send(task_id.clone()) {
            warn!(task_id = %task_id, error = %e, "notify queue full or closed, dropping enqueue");
        }
    }
}

async fn deliver_one(client: &reqwest::Client, store: &TaskStore, config: &ManagerConfig, task_id: &str) {
    let enqueue_time_run_id = match store.get(task_id) {
        Some(t) => t.run_id,
        None => {
            warn!(task_id = %task_id, "notify worker received unknown task_id");
            return;
        }
    };

    for attempt in 1..=config.notify_max_retries {
        // Stale-run guard: re-read the task fresh on every attempt.
        let task = match store.get(task_id) {
            Some(t) => t,
            None => return,
        };

        if task.run_id != enqueue_time_run_id {
            info!(task_id = %task_id, "notify attempt dropped: task was restarted mid-delivery");
            return;
        }

        let notify_url = match &task.notify_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => return, // Empty or missing notify_url is a no-op success.
        };

        let payload = NotifyPayload {
            task_id: task.task_id.clone(),
            run_id: task.run_id.clone(),
            status: task.status,
            script_output: task.script_output.clone(),
        };

        let result = client
            .post(&notify_url)
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let mut delivered = task;
                delivered.notify_delivered_at = Some(current_timestamp());
                delivered.notify_attempts = attempt;
                if let Err(e) = store.put(delivered) {
                    warn!(task_id = %task_id, error = %e, "failed to persist notify delivery");
                }
                info!(task_id = %task_id, attempt, "notify delivered");
                return;
            }
            Ok(response) => {
                let mut retried = task;
                retried.notify_attempts = attempt;
                retried.notify_last_error = Some(format!("HTTP {}", response.status()));
                let _ = store.put(retried);
            }
            Err(e) => {
                let mut retried = task;
                retried.notify_attempts = attempt;
                retried.notify_last_error = Some(e.to_string());
                let _ = store.put(retried);
            }
        }

        if attempt < config.notify_max_retries {
            let delay = notify_backoff_delay_seconds(
                attempt,
                config.notify_retry_delay,
                config.notify_backoff_factor,
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    warn!(task_id = %task_id, attempts = config.notify_max_retries, "notify exhausted retries, giving up");
}

/// Background notify workers: consume task_ids off the bounded queue and
/// drive the retry loop for each, a small fixed pool rather than one task per
/// notification.
pub fn spawn_notify_workers(
    store: Arc<TaskStore>,
    config: Arc<ManagerConfig>,
    receiver: mpsc::Receiver<String>,
    worker_count: usize,
) -> tokio::task::JoinHandle<()> {
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut workers = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let store = Arc::clone(&store);
            let config = Arc::clone(&config);
            let receiver = Arc::clone(&receiver);
            let client = client.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let task_id = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match task_id {
                        Some(task_id) => deliver_one(&client, &store, &config, &task_id).await,
                        None => break,
                    }
                }
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_matches_config() {
        let delays: Vec<u64> = (1..=3)
            .map(|n| notify_backoff_delay_seconds(n, 60, 1.5))
            .collect();
        assert_eq!(delays, vec![60, 90, 135]);
    }
}
