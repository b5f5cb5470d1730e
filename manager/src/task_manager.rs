//! Task Manager: owns the Task state machine, per-task-id locking, and the
//! submit/dispatch/complete/timeout/restart operations.

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::notify::NotifyPipeline;
use crate::task_store::{TaskListFilter, TaskStore};
use shared::api::{CompletionRequest, RestartSelectedResponse, SkippedRestart, TaskRequest};
use shared::model::{Task, TaskStatus};
use shared::utils::current_timestamp;
use shared::{ManagerConfig, ManagerError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Number of lock stripes for per-`task_id` mutation locking. Bounds memory
/// regardless of how many distinct tasks have ever existed, rather than one
/// lock per task.
const LOCK_STRIPES: usize = 1024;

/// Capacity of the bounded dispatch queue. Full queue causes `submit` to
/// reject new work (503) rather than grow memory without bound.
const DISPATCH_QUEUE_CAPACITY: usize = 4096;

pub struct TaskManager {
    store: Arc<TaskStore>,
    dispatcher: Arc<Dispatcher>,
    notify: Arc<NotifyPipeline>,
    config: Arc<ManagerConfig>,
    stripes: Vec<Mutex<()>>,
    dispatch_tx: mpsc::Sender<String>,
}

fn stripe_index(task_id: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    task_id.hash(&mut hasher);
    (hasher.finish() as usize) % LOCK_STRIPES
}

impl TaskManager {
    pub fn new(
        store: Arc<TaskStore>,
        dispatcher: Arc<Dispatcher>,
        notify: Arc<NotifyPipeline>,
        config: Arc<ManagerConfig>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        let manager = Arc::new(Self {
            store,
            dispatcher,
            notify,
            config,
            stripes,
            dispatch_tx,
        });

        (manager, dispatch_rx)
    }

    async fn lock_task(&self, task_id: &str) -> tokio::sync::MutexGuard<'_, ()> {
        self.stripes[stripe_index(task_id)].lock().await
    }

    /// `POST /task/execute`: create the Task in `pending`, persist, return
    /// its `task_id` immediately. Enqueues dispatch asynchronously; never
    /// blocks on runner I/O.
    pub async fn submit(&self, request: TaskRequest) -> Result<String> {
        // Reserve dispatch-queue capacity before creating anything durable,
        // so a full queue rejects the request outright (503) rather than
        // leaving an orphaned persisted task with no dispatch in flight.
        let permit = self.dispatch_tx.try_reserve().map_err(|_| {
            ManagerError::TransientNetwork("dispatch queue is full, try again shortly".to_string())
        })?;

        let task_id = uuid::Uuid::new_v4().to_string();
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = current_timestamp();

        let task = Task {
            task_id: task_id.clone(),
            etab_name: request.etab_name,
            app_name: request.app_name,
            app_version: request.app_version,
            task_type: request.task_type,
            source_url: request.source_url,
            affiliation: request.affiliation,
            parameters: request.parameters,
            notify_url: request.notify_url,
            runner_url: None,
            runner_name: None,
            status: TaskStatus::Pending,
            run_id,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            script_output: None,
            notify_attempts: 0,
            notify_last_error: None,
            notify_delivered_at: None,
            dispatch_attempts: 0,
        };

        self.store.put(task)?;
        permit.send(task_id.clone());

        Ok(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.store.get(task_id)
    }

    pub fn list(&self, filter: &TaskListFilter) -> Vec<Task> {
        self.store.list(filter)
    }

    /// Re-enqueue every currently `pending` task at startup, when
    /// `redispatch_pending_on_startup` is enabled.
    pub fn redispatch_pending(self: &Arc<Self>) {
        let pending = self.store.list(&TaskListFilter {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        });

        for task in pending {
            if let Err(e) = self.dispatch_tx.try_send(task.task_id.clone()) {
                warn!(task_id = %task.task_id, error = %e, "failed to re-enqueue pending task at startup");
            }
        }
    }

    /// One dispatch attempt for `task_id`, run by a dispatch worker. Holds
    /// this task's stripe lock for the full ping+run round trip, since no
    /// other mutation of the same task may occur concurrently.
    pub async fn attempt_dispatch(self: &Arc<Self>, task_id: String) {
        let _guard = self.lock_task(&task_id).await;

        let mut task = match self.store.get(&task_id) {
            Some(t) => t,
            None => {
                warn!(task_id = %task_id, "dispatch worker received unknown task_id");
                return;
            }
        };

        if task.status != TaskStatus::Pending {
            // Already moved on (e.g. raced with a restart or another worker).
            return;
        }

        // Regenerate the run_id before the runner ever sees it, so the
        // RunRequest we send and the Task we persist on Dispatched agree on
        // the correlation id the runner will echo back on completion.
        task.run_id = uuid::Uuid::new_v4().to_string();

        let completion_callback = format!(
            "{}{}",
            self.config.effective_public_base_url(),
            shared::api::endpoints::TASK_COMPLETION
        );

        let outcome = self.dispatcher.dispatch(&task, completion_callback).await;

        match outcome {
            DispatchOutcome::Dispatched { runner_url, runner_name } => {
                let mut updated = task;
                updated.status = TaskStatus::Running;
                updated.runner_url = Some(runner_url.clone());
                updated.runner_name = Some(runner_name);
                updated.started_at = Some(current_timestamp());
                if let Err(e) = self.store.put(updated) {
                    warn!(task_id = %task_id, error = %e, "failed to persist dispatched task");
                }
                info!(task_id = %task_id, runner_url = %runner_url, "task dispatched");
            }
            DispatchOutcome::NoRunnerAvailable => {
                let mut updated = task;
                updated.dispatch_attempts += 1;

                let max_attempts = self.config.dispatch_max_attempts;
                let exhausted = max_attempts != 0 && updated.dispatch_attempts >= max_attempts;

                if exhausted {
                    updated.status = TaskStatus::Rejected;
                    updated.error_message = Some("no eligible runner".to_string());
                    if let Err(e) = self.store.put(updated) {
                        warn!(task_id = %task_id, error = %e, "failed to persist rejected task");
                    }
                    self.notify.enqueue(task_id.clone());
                    warn!(task_id = %task_id, "task rejected: no eligible runner after max attempts");
                } else {
                    if let Err(e) = self.store.put(updated) {
                        warn!(task_id = %task_id, error = %e, "failed to persist retry bookkeeping");
                    }
                    self.schedule_retry(task_id);
                }
            }
            DispatchOutcome::RunnerRejected { reason } => {
                let mut updated = task;
                updated.status = TaskStatus::Rejected;
                updated.error_message = Some(reason.clone());
                if let Err(e) = self.store.put(updated) {
                    warn!(task_id = %task_id, error = %e, "failed to persist rejected task");
                }
                self.notify.enqueue(task_id.clone());
                warn!(task_id = %task_id, reason = %reason, "task rejected by runner");
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, task_id: String) {
        let manager = Arc::clone(self);
        let delay = std::time::Duration::from_secs(self.config.dispatch_retry_delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.dispatch_tx.try_send(task_id.clone()) {
                warn!(task_id = %task_id, error = %e, "failed to re-enqueue task after dispatch retry delay");
            }
        });
    }

    /// `POST /task/completion` (runner-initiated). Distinguishes a real state
    /// transition from a stale or already-acknowledged completion so the
    /// caller can map each to the right response.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutcome> {
        let _guard = self.lock_task(&request.task_id).await;

        let mut task = self
            .store
            .get(&request.task_id)
            .ok_or_else(|| ManagerError::NotFound(format!("unknown task {}", request.task_id)))?;

        if let Some(ref run_id) = request.run_id {
            if run_id != &task.run_id {
                return Ok(CompletionOutcome::Stale);
            }
        } else {
            // Missing run_id: treat as matching current for backward
            // compatibility with legacy runners, but log it.
            warn!(task_id = %request.task_id, "completion arrived without run_id, assuming current run");
        }

        if task.status != TaskStatus::Running {
            // Already transitioned by a prior winning completion for this
            // run_id: idempotent re-acknowledgement, no state change.
            return Ok(CompletionOutcome::Idempotent);
        }

        task.status = request.status.into();
        task.completed_at = Some(current_timestamp());
        task.error_message = request.error_message;
        task.script_output = request.script_output;
        self.store.put(task)?;

        self.notify.enqueue(request.task_id.clone());

        Ok(CompletionOutcome::Transitioned)
    }

    /// Periodic sweep: any `running` task whose execution has exceeded
    /// `execution_timeout` is transitioned to `timeout`.
    pub async fn sweep_timeouts(&self) {
        let now = current_timestamp();
        let running = self.store.list(&TaskListFilter {
            status: Some(TaskStatus::Running),
            ..Default::default()
        });

        for task in running {
            let task_id = task.task_id.clone();
            let _guard = self.lock_task(&task_id).await;

            // Re-read inside the lock: a completion may have won the race
            // since the snapshot was taken.
            let mut current = match self.store.get(&task_id) {
                Some(t) => t,
                None => continue,
            };

            if current.status != TaskStatus::Running {
                continue;
            }

            let started_at = match current.started_at {
                Some(s) => s,
                None => continue,
            };

            if now.saturating_sub(started_at) > self.config.execution_timeout {
                current.status = TaskStatus::Timeout;
                current.completed_at = Some(now);
                current.error_message = Some(format!(
                    "execution exceeded timeout of {} seconds",
                    self.config.execution_timeout
                ));
                if let Err(e) = self.store.put(current) {
                    warn!(task_id = %task_id, error = %e, "failed to persist timed-out task");
                }
                self.notify.enqueue(task_id.clone());
                warn!(task_id = %task_id, "task timed out");
            }
        }
    }

    /// `POST /tasks/restart-selected`.
    pub async fn restart_selected(self: &Arc<Self>, task_ids: Vec<String>) -> RestartSelectedResponse {
        let mut response = RestartSelectedResponse {
            requested: task_ids.clone(),
            ..Default::default()
        };

        for task_id in task_ids {
            let _guard = self.lock_task(&task_id).await;

            let mut task = match self.store.get(&task_id) {
                Some(t) => t,
                None => {
                    response.failed.push(task_id);
                    continue;
                }
            };

            if !task.status.is_terminal() {
                response.skipped.push(SkippedRestart {
                    task_id: task_id.clone(),
                    reason: format!("task is in non-terminal state {:?}", task.status),
                });
                continue;
            }

            task.run_id = uuid::Uuid::new_v4().to_string();
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.completed_at = None;
            task.error_message = None;
            task.dispatch_attempts = 0;

            if let Err(e) = self.store.put(task) {
                warn!(task_id = %task_id, error = %e, "failed to persist restarted task");
                response.failed.push(task_id);
                continue;
            }

            if let Err(e) = self.dispatch_tx.try_send(task_id.clone()) {
                warn!(task_id = %task_id, error = %e, "failed to enqueue dispatch after restart");
            }

            response.restarted.push(task_id);
        }

        response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Transitioned,
    Idempotent,
    Stale,
}

/// Background dispatch workers: consume task_ids off the bounded queue and
/// attempt one dispatch each. A small fixed pool rather than one task per
/// dispatch.
pub fn spawn_dispatch_workers(
    manager: Arc<TaskManager>,
    receiver: mpsc::Receiver<String>,
    worker_count: usize,
) -> tokio::task::JoinHandle<()> {
    let receiver = Arc::new(Mutex::new(receiver));

    tokio::spawn(async move {
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let manager = Arc::clone(&manager);
            let receiver = Arc::clone(&receiver);
            workers.push(tokio::spawn(async move {
                loop {
                    let task_id = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match task_id {
                        Some(task_id) => manager.attempt_dispatch(task_id).await,
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

pub fn spawn_timeout_sweeper(
    manager: Arc<TaskManager>,
    sweep_interval: u64,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    manager.sweep_timeouts().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("task timeout sweeper received shutdown signal");
                    break;
                }
            }
        }
    })
}
