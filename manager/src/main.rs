//! Manager coordination service
//!
//! The Manager accepts task submissions from clients, dispatches them to
//! registered remote runners, tracks task state to completion, and relays
//! webhook notifications back to clients.
// This is the main entry point for the binary. It's responsible for:
// - Initializing logging and configuration.
// - Wiring up the Runner Registry, Task Manager, dispatch/notify workers,
//   and the REST API.
// - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance.
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Manager version from Cargo.toml, also reported to runners on register
/// rejection and surfaced at `GET /`.
const MANAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of background dispatch workers draining the bounded dispatch queue.
const DISPATCH_WORKER_COUNT: usize = 4;

/// Number of background notify workers draining the bounded notify queue.
const NOTIFY_WORKER_COUNT: usize = 4;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod config;
mod dispatcher;
mod notify;
mod registry;
mod result_access;
mod runner_client;
mod task_manager;
mod task_store;

use api::AppState;
use config::ConfigManager;
use dispatcher::Dispatcher;
use notify::NotifyPipeline;
use registry::RunnerRegistry;
use result_access::ResultAccess;
use runner_client::RunnerClient;
use task_manager::TaskManager;
use task_store::TaskStore;

/// Command-line arguments for the Manager.
#[derive(Parser, Debug)]
#[command(name = "manager")]
#[command(about = "Central coordination service for media-processing task dispatch", long_about = None)]
struct CliArgs {
    /// Path to the Manager configuration file (manager.toml).
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen port from config file.
    #[arg(long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Override the externally-reachable base URL from config file.
    #[arg(long = "public-base-url", value_name = "URL")]
    public_base_url: Option<String>,
}

/// The main application structure for the Manager. Holds every long-lived
/// component and the handles needed to shut them down in order.
pub struct Server {
    pub config_manager: Arc<Mutex<ConfigManager>>,
    config: Arc<shared::ManagerConfig>,
    listen_address: SocketAddr,
    registry: Arc<RunnerRegistry>,
    store: Arc<TaskStore>,
    task_manager: Arc<TaskManager>,
    result_access: Arc<ResultAccess>,
    dispatch_rx: Option<tokio::sync::mpsc::Receiver<String>>,
    notify_rx: Option<tokio::sync::mpsc::Receiver<String>>,
    liveness_task_handle: Option<JoinHandle<()>>,
    timeout_task_handle: Option<JoinHandle<()>>,
    dispatch_task_handle: Option<JoinHandle<()>>,
    notify_task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    /// Builds every component from the loaded configuration. No background
    /// task is spawned yet; that happens in `run()`.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_manager = ConfigManager::new(config_path)?;
        let manager_config = config_manager
            .manager_config
            .clone()
            .expect("Manager configuration not loaded. This should not happen as config is loaded in new().");
        let config = Arc::new(manager_config);

        let listen_address: SocketAddr = format!("0.0.0.0:{}", config.manager_port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid manager_port {}: {}", config.manager_port, e))?;

        let registry = Arc::new(RunnerRegistry::new(MANAGER_VERSION));

        let store = Arc::new(
            TaskStore::new(&config.task_store_path)
                .context("failed to initialize task store")?,
        );

        let client = RunnerClient::new().context("failed to build runner HTTP client")?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            client.clone(),
            std::time::Duration::from_secs(config.ping_timeout),
            std::time::Duration::from_secs(config.dispatch_timeout),
        ));

        let (notify, notify_rx) = NotifyPipeline::new();
        let notify = Arc::new(notify);

        let (task_manager, dispatch_rx) = TaskManager::new(
            Arc::clone(&store),
            dispatcher,
            Arc::clone(&notify),
            Arc::clone(&config),
        );

        let result_access = Arc::new(ResultAccess::new(
            Arc::clone(&config),
            client,
            Arc::clone(&registry),
        ));

        Ok(Self {
            config_manager: Arc::new(Mutex::new(config_manager)),
            config,
            listen_address,
            registry,
            store,
            task_manager,
            result_access,
            dispatch_rx: Some(dispatch_rx),
            notify_rx: Some(notify_rx),
            liveness_task_handle: None,
            timeout_task_handle: None,
            dispatch_task_handle: None,
            notify_task_handle: None,
            shutdown_tx: None,
        })
    }

    /// Starts the Manager and runs indefinitely, serving HTTP traffic until a
    /// shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting Manager coordination service");

        info!(
            listen_address = %self.listen_address,
            task_store_path = %self.config.task_store_path,
            shared_storage_enabled = self.config.shared_storage_enabled,
            "Manager configuration loaded"
        );

        let loaded = self
            .store
            .load_all()
            .context("failed to load task store from disk")?;
        info!(tasks_loaded = loaded, "task store loaded from disk");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        if self.config.redispatch_pending_on_startup {
            info!("re-enqueueing pending tasks left over from a previous run");
            self.task_manager.redispatch_pending();
        }

        let dispatch_rx = self
            .dispatch_rx
            .take()
            .expect("dispatch receiver consumed more than once");
        self.dispatch_task_handle = Some(task_manager::spawn_dispatch_workers(
            Arc::clone(&self.task_manager),
            dispatch_rx,
            DISPATCH_WORKER_COUNT,
        ));

        let notify_rx = self
            .notify_rx
            .take()
            .expect("notify receiver consumed more than once");
        self.notify_task_handle = Some(notify::spawn_notify_workers(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            notify_rx,
            NOTIFY_WORKER_COUNT,
        ));

        self.liveness_task_handle = Some(registry::spawn_liveness_sweeper(
            Arc::clone(&self.registry),
            self.config.heartbeat_sweep_interval,
            self.config.heartbeat_dead_after,
            shutdown_tx.subscribe(),
        ));

        self.timeout_task_handle = Some(task_manager::spawn_timeout_sweeper(
            Arc::clone(&self.task_manager),
            self.config.timeout_sweep_interval,
            shutdown_tx.subscribe(),
        ));

        let app_state = AppState {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            task_manager: Arc::clone(&self.task_manager),
            result_access: Arc::clone(&self.result_access),
            manager_version: Arc::from(MANAGER_VERSION),
        };

        let app = api::create_router(app_state);

        info!("Starting HTTP server on {}", self.listen_address);

        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind TCP listener to {}. \
                     Check if port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Performs a graceful shutdown of the Manager.
    ///
    /// Shutdown sequence:
    /// 1. Broadcast shutdown signal to all background tasks.
    /// 2. Wait for each background task to finish (configurable timeout).
    /// 3. The HTTP server itself is shut down by `axum::serve`'s own
    ///    graceful-shutdown future, which races the same signal in `run()`.
    pub async fn shutdown(&mut self) {
        info!("Shutting down Manager coordination service gracefully");

        let shutdown_timeout_secs = self.config.graceful_shutdown_timeout;

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("Failed to send shutdown signal: {}", e);
            }
        }

        for (name, handle) in [
            ("liveness sweeper", self.liveness_task_handle.take()),
            ("timeout sweeper", self.timeout_task_handle.take()),
        ] {
            if let Some(handle) = handle {
                info!("Waiting for {} to complete (timeout: {}s)", name, shutdown_timeout_secs);
                match tokio::time::timeout(
                    std::time::Duration::from_secs(shutdown_timeout_secs),
                    handle,
                )
                .await
                {
                    Ok(Ok(())) => info!("{} completed successfully", name),
                    Ok(Err(e)) => warn!("{} panicked: {}", name, e),
                    Err(_) => warn!("{} shutdown timeout reached, aborting", name),
                }
            }
        }

        // Dispatch and notify workers exit only when their queue's sender
        // half is dropped; they don't listen on the shutdown broadcast.
        // Aborting them directly bounds shutdown to the configured timeout
        // instead of waiting on queues that may never drain.
        if let Some(handle) = self.dispatch_task_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.notify_task_handle.take() {
            handle.abort();
        }

        info!("Manager shutdown complete");
    }
}

/// Sets up signal handlers for graceful shutdown.
/// Returns a future that completes when a shutdown signal is received.
///
/// On Unix systems, handles SIGTERM and SIGINT signals.
/// On non-Unix systems, handles Ctrl+C.
/// If signal registration fails, falls back to Ctrl+C handling.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                error!("Falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Manager entry point.
///
/// Initializes logging, loads configuration, builds the Manager instance,
/// and runs until a shutdown signal is received.
#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "manager.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("manager=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("Manager coordination service starting up");
    info!("Configuration file: {}", cli_args.config_file.display());

    if cli_args.port.is_some() {
        info!("Port override provided via command line");
    }
    if cli_args.public_base_url.is_some() {
        info!("Public base URL override provided via command line");
    }

    let mut server = match Server::new(cli_args.config_file) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to initialize Manager: {}", e);
            std::process::exit(1);
        }
    };

    if cli_args.port.is_some() || cli_args.public_base_url.is_some() {
        let changed = {
            let mut config_manager = server.config_manager.lock().await;
            match config_manager.override_and_persist_config(cli_args.port, cli_args.public_base_url) {
                Ok(changed) => changed,
                Err(e) => {
                    error!("Failed to apply configuration overrides: {}", e);
                    std::process::exit(1);
                }
            }
        };

        if changed {
            info!("Configuration overrides applied and persisted to disk; restart to take effect");
        } else {
            info!("Command-line values match existing config, no changes needed");
        }
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Manager error: {}", e);
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown");
        }
    }

    server.shutdown().await;
    info!("Manager shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_server_creation() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let task_store_dir = tempfile::tempdir().unwrap();
        writeln!(
            temp_file,
            r#"
authorized_tokens = ["test-token"]
manager_port = 8787
task_store_path = "{}"
"#,
            task_store_dir.path().display()
        )
        .unwrap();

        let config_path = temp_file.path().to_path_buf();
        let result = Server::new(config_path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_server_creation_rejects_missing_config() {
        let result = Server::new(PathBuf::from("/nonexistent/manager.toml"));
        assert!(result.is_err());
    }
}
