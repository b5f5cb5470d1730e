//! REST API implementation for the Manager coordination service.
//!
//! This module provides the HTTP endpoints clients and runners use to
//! submit tasks, report completions, register/heartbeat, and fetch results.
// Each public handler below corresponds to one coordination-protocol
// endpoint and is responsible for authenticating the request,
// translating it into a Task Manager / Runner Registry / Result Access
// call, and mapping the outcome onto an HTTP response.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use shared::api::{
    endpoints, headers as api_headers, Ack, CompletionRequest, HeartbeatRequest, RegisterRequest,
    RestartSelectedRequest, RunnerListEntry, TaskRequest, TaskRequestResponse, TaskStatusResponse,
    UnregisterRequest,
};
use shared::utils::{token_matches, validate_public_url};
use shared::ManagerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::registry::{GateOutcome, RunnerRegistry};
use crate::result_access::{proxied_body, ResultAccess, ResultFile};
use crate::task_manager::{CompletionOutcome, TaskManager};

/// Manager version string reported in registration/heartbeat rejections and
/// the root info endpoint. Set once at startup from `CARGO_PKG_VERSION`.
pub type ManagerVersion = Arc<str>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ManagerConfig>,
    pub registry: Arc<RunnerRegistry>,
    pub task_manager: Arc<TaskManager>,
    pub result_access: Arc<ResultAccess>,
    pub manager_version: ManagerVersion,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route(endpoints::TASK_EXECUTE, post(handle_task_execute))
        .route(endpoints::TASK_STATUS, get(handle_task_status))
        .route(endpoints::TASK_RESULT, get(handle_task_result))
        .route(
            "/task/result/{id}/file/{*file_path}",
            get(handle_task_result_file),
        )
        .route(endpoints::TASK_COMPLETION, post(handle_task_completion))
        .route(endpoints::RUNNER_REGISTER, post(handle_runner_register))
        .route(endpoints::RUNNER_HEARTBEAT, post(handle_runner_heartbeat))
        .route(endpoints::RUNNER_UNREGISTER, post(handle_runner_unregister))
        .route(endpoints::RUNNER_LIST, get(handle_runner_list))
        .route(
            endpoints::TASKS_RESTART_SELECTED,
            post(handle_restart_selected),
        )
        .with_state(state)
}

/// `GET /`: unauthenticated root info.
async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Manager coordination service",
        "version": &*state.manager_version,
        "documentation": "/docs",
    }))
}

/// `POST /task/execute`.
async fn handle_task_execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    if request.etab_name.trim().is_empty()
        || request.app_name.trim().is_empty()
        || request.task_type.trim().is_empty()
        || request.source_url.trim().is_empty()
    {
        return Err(ApiError::UnprocessableEntity(
            "etab_name, app_name, task_type, and source_url are required".to_string(),
        ));
    }

    validate_public_url(&request.source_url, state.config.ssrf_allow_private)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if let Some(ref notify_url) = request.notify_url {
        if !notify_url.is_empty() {
            validate_public_url(notify_url, state.config.ssrf_allow_private)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
    }

    let task_id = state.task_manager.submit(request).await?;
    Ok(Json(TaskRequestResponse { task_id }))
}

/// `GET /task/status/{id}`.
async fn handle_task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    let task = state
        .task_manager
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such task {}", task_id)))?;

    Ok(Json(TaskStatusResponse {
        task_id: task.task_id,
        status: task.status,
        runner_url: task.runner_url,
        runner_name: task.runner_name,
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
        error_message: task.error_message,
    }))
}

/// `GET /task/result/{id}`: the manifest JSON.
async fn handle_task_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    let task = state
        .task_manager
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such task {}", task_id)))?;

    let manifest = state.result_access.get_manifest(&task).await?;
    Ok(Json(manifest))
}

/// `GET /task/result/{id}/file/{file_path}`.
async fn handle_task_result_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((task_id, file_path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    let task = state
        .task_manager
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such task {}", task_id)))?;

    let file = state.result_access.get_file(&task, &file_path).await?;

    let body = match file {
        ResultFile::Local { path } => {
            let handle = tokio::fs::File::open(&path)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to open result file: {}", e)))?;
            axum::body::Body::from_stream(tokio_util::io::ReaderStream::new(handle))
        }
        ResultFile::Proxied { response } => proxied_body(response),
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .expect("static response headers are always valid"))
}

/// `POST /task/completion` (runner-initiated).
async fn handle_task_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    let task_id = request.task_id.clone();
    match state.task_manager.complete(request).await? {
        CompletionOutcome::Transitioned | CompletionOutcome::Idempotent => {
            Ok((StatusCode::OK, Json(Ack::ok())).into_response())
        }
        CompletionOutcome::Stale => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "stale": true, "task_id": task_id})),
        )
            .into_response()),
    }
}

/// `POST /runner/register`.
async fn handle_runner_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;
    let version = validate_runner_version(&headers)?;

    if request.url.trim().is_empty() || request.name.trim().is_empty() || request.token.trim().is_empty()
    {
        return Err(ApiError::UnprocessableEntity(
            "url, name, and token are required".to_string(),
        ));
    }

    let canonical_url = canonicalize_runner_url(&request.url)?;

    match state.registry.register(
        canonical_url,
        request.name,
        request.token,
        version.clone(),
        request.task_types,
    ) {
        GateOutcome::Ok => Ok(Json(Ack::ok())),
        GateOutcome::VersionMismatch { expected, got } => Err(ApiError::BadRequest(format!(
            "runner version {} is incompatible with manager version {}",
            got, expected
        ))),
        GateOutcome::Unknown => unreachable!("register never returns Unknown"),
    }
}

/// `POST /runner/heartbeat`.
async fn handle_runner_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;
    let version = validate_runner_version(&headers)?;
    let canonical_url = canonicalize_runner_url(&request.url)?;

    match state.registry.heartbeat(&canonical_url, &version) {
        GateOutcome::Ok => Ok(Json(Ack::ok())),
        GateOutcome::VersionMismatch { expected, got } => Err(ApiError::BadRequest(format!(
            "runner version {} is incompatible with manager version {}",
            got, expected
        ))),
        GateOutcome::Unknown => Err(ApiError::NotFound(format!(
            "runner {} is not registered",
            canonical_url
        ))),
    }
}

/// `POST /runner/unregister`. Exposes the explicit-unregister lifecycle
/// action as a first-class registry operation alongside heartbeat-driven
/// liveness sweeping.
async fn handle_runner_unregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UnregisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;
    let canonical_url = canonicalize_runner_url(&request.url)?;
    state.registry.unregister(&canonical_url);
    Ok(Json(Ack::ok()))
}

/// `GET /runner/list`.
async fn handle_runner_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_token(&headers, &state.config.authorized_tokens)?;

    let entries: Vec<RunnerListEntry> = state
        .registry
        .list()
        .into_iter()
        .map(|r| RunnerListEntry {
            url: r.url,
            name: r.name,
            version: r.version,
            status: r.status,
            task_types: r.task_types,
            last_heartbeat_at: r.last_heartbeat_at,
        })
        .collect();

    Ok(Json(entries))
}

/// `POST /tasks/restart-selected` (admin Basic auth).
async fn handle_restart_selected(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RestartSelectedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_admin_basic_auth(&headers, &state.config.admin_users)?;
    let response = state.task_manager.restart_selected(request.task_ids).await;
    Ok(Json(response))
}

/// Reads a bearer token from either the custom `X-API-Token` header or a
/// standard `Authorization: Bearer` header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(api_headers::API_TOKEN) {
        return value.to_str().ok().map(str::to_string);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn validate_api_token(
    headers: &HeaderMap,
    authorized: &std::collections::HashSet<String>,
) -> Result<(), ApiError> {
    let token = extract_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing API token".to_string()))?;
    if token_matches(&token, authorized) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid API token".to_string()))
    }
}

fn validate_runner_version(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(api_headers::RUNNER_VERSION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("missing X-Runner-Version header".to_string()))
}

fn validate_admin_basic_auth(
    headers: &HeaderMap,
    admin_users: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::Unauthorized("expected Basic authentication".to_string()))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::Unauthorized("invalid Basic auth encoding".to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiError::Unauthorized("invalid Basic auth encoding".to_string()))?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::Unauthorized("invalid Basic auth format".to_string()))?;

    let hash = admin_users
        .get(user)
        .ok_or_else(|| ApiError::Unauthorized("invalid admin credentials".to_string()))?;

    match bcrypt::verify(password, hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::Unauthorized("invalid admin credentials".to_string())),
        Err(e) => {
            warn!(error = %e, "bcrypt verification failed");
            Err(ApiError::Unauthorized("invalid admin credentials".to_string()))
        }
    }
}

/// Canonicalise a runner-submitted URL to scheme+host+port, the form used as
/// the registry's primary key.
fn canonicalize_runner_url(url: &str) -> Result<String, ApiError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ApiError::BadRequest(format!("invalid runner url '{}': {}", url, e)))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ApiError::BadRequest(format!(
            "runner url '{}' must use http:// or https://",
            url
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ApiError::BadRequest(format!("runner url '{}' must have a host", url)))?;

    let mut canonical = format!("{}://{}", scheme, host);
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{}", port));
    }

    Ok(canonical)
}

/// The Manager's HTTP-facing error taxonomy.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    UnprocessableEntity(String),
    NotFound(String),
    Upstream(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<shared::ManagerError>() {
            Ok(manager_err) => match manager_err {
                shared::ManagerError::Auth(m) => ApiError::Unauthorized(m),
                shared::ManagerError::Validation(m) => ApiError::BadRequest(m),
                shared::ManagerError::NotFound(m) => ApiError::NotFound(m),
                shared::ManagerError::Stale => {
                    ApiError::Internal("stale completion should be handled before this point".to_string())
                }
                shared::ManagerError::Runner(m) => ApiError::Internal(m),
                shared::ManagerError::Upstream(m) => ApiError::Upstream(m),
                shared::ManagerError::TransientNetwork(m) => ApiError::ServiceUnavailable(m),
                shared::ManagerError::FatalConfig(m) => ApiError::Internal(m),
            },
            Err(other) => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::UnprocessableEntity(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            ApiError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };

        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "details": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::notify::NotifyPipeline;
    use crate::registry::RunnerRegistry;
    use crate::runner_client::RunnerClient;
    use crate::task_manager::TaskManager;
    use crate::task_store::TaskStore;
    use axum::routing::{get as axum_get, post as axum_post};
    use shared::api::{PingResponse, RunRequest};
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn test_config(tmp: &std::path::Path) -> ManagerConfig {
        ManagerConfig {
            manager_port: 0,
            public_base_url: None,
            authorized_tokens: HashSet::from(["test-token".to_string()]),
            admin_users: HashMap::from([(
                "admin".to_string(),
                bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap(),
            )]),
            cors_allow_origins: vec!["*".to_string()],
            cors_allow_credentials: false,
            cors_allow_methods: vec!["GET".to_string(), "POST".to_string()],
            cors_allow_headers: vec!["Content-Type".to_string()],
            log_directory: "/tmp".to_string(),
            log_level: "info".to_string(),
            runners_storage_enabled: false,
            runners_storage_path: "/tmp/runners.json".to_string(),
            task_store_path: tmp.to_string_lossy().to_string(),
            shared_storage_enabled: false,
            shared_storage_root: "/tmp/results".to_string(),
            heartbeat_dead_after: 180,
            heartbeat_sweep_interval: 30,
            ping_timeout: 2,
            dispatch_timeout: 2,
            dispatch_retry_delay: 1,
            dispatch_max_attempts: 3,
            execution_timeout: 3600,
            timeout_sweep_interval: 60,
            notify_max_retries: 3,
            notify_retry_delay: 1,
            notify_backoff_factor: 1.0,
            graceful_shutdown_timeout: 5,
            ssrf_allow_private: true,
            redispatch_pending_on_startup: true,
        }
    }

    async fn test_app(tmp_dir: &tempfile::TempDir) -> AppState {
        let config = Arc::new(test_config(tmp_dir.path()));
        let store = Arc::new(TaskStore::new(tmp_dir.path()).unwrap());
        let registry = Arc::new(RunnerRegistry::new("1.0.0"));
        let client = RunnerClient::new().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            client.clone(),
            Duration::from_secs(config.ping_timeout),
            Duration::from_secs(config.dispatch_timeout),
        ));
        let (notify, notify_rx) = NotifyPipeline::new();
        let notify = Arc::new(notify);
        let (task_manager, dispatch_rx) =
            TaskManager::new(Arc::clone(&store), dispatcher, Arc::clone(&notify), Arc::clone(&config));

        crate::task_manager::spawn_dispatch_workers(Arc::clone(&task_manager), dispatch_rx, 2);
        crate::notify::spawn_notify_workers(Arc::clone(&store), Arc::clone(&config), notify_rx, 2);

        let result_access = Arc::new(crate::result_access::ResultAccess::new(
            Arc::clone(&config),
            client,
            Arc::clone(&registry),
        ));

        AppState {
            config,
            registry,
            task_manager,
            result_access,
            manager_version: Arc::from("1.0.0"),
        }
    }

    async fn spawn_app(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// A stand-in Runner server: advertises `task_types`, accepts `/task/run`,
    /// and fires a synthetic completion callback shortly after.
    async fn spawn_stub_runner(task_types: Vec<&str>, completion_status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task_types: Vec<String> = task_types.into_iter().map(str::to_string).collect();

        let router = Router::new()
            .route(
                "/runner/ping",
                axum_get(move || {
                    let task_types = task_types.clone();
                    async move {
                        Json(PingResponse {
                            available: true,
                            registered: true,
                            task_types,
                        })
                    }
                }),
            )
            .route(
                "/task/run",
                axum_post(move |Json(request): Json<RunRequest>| async move {
                    let callback = request.completion_callback.clone();
                    let task_id = request.task_id.clone();
                    let run_id = request.run_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        let client = reqwest::Client::new();
                        let _ = client
                            .post(&callback)
                            .json(&serde_json::json!({
                                "task_id": task_id,
                                "status": completion_status,
                                "run_id": run_id,
                            }))
                            .send()
                            .await;
                    });
                    StatusCode::OK
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_task_execute_requires_token() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}{}", base_url, shared::api::endpoints::TASK_EXECUTE))
            .json(&serde_json::json!({
                "etab_name": "example-univ",
                "app_name": "studio",
                "task_type": "encoding",
                "source_url": "http://127.0.0.1:1/a.mp4",
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_task_execute_rejects_empty_required_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}{}", base_url, shared::api::endpoints::TASK_EXECUTE))
            .header("X-API-Token", "test-token")
            .json(&serde_json::json!({
                "etab_name": "",
                "app_name": "studio",
                "task_type": "encoding",
                "source_url": "http://127.0.0.1:1/a.mp4",
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_task_status_unknown_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/task/status/does-not-exist", base_url))
            .header("X-API-Token", "test-token")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_runner_register_version_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}{}", base_url, shared::api::endpoints::RUNNER_REGISTER))
            .header("X-API-Token", "test-token")
            .header("X-Runner-Version", "2.0.0")
            .json(&serde_json::json!({
                "url": "http://127.0.0.1:9999",
                "name": "runner-1",
                "token": "runner-token",
                "task_types": ["encoding"],
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_restart_selected_requires_admin_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "{}{}",
                base_url,
                shared::api::endpoints::TASKS_RESTART_SELECTED
            ))
            .json(&serde_json::json!({"task_ids": []}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_root_info_requires_no_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_app(test_app(&tmp).await).await;

        let client = reqwest::Client::new();
        let response = client.get(base_url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_happy_path_submit_dispatch_complete_notify() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_app(&tmp).await;
        let registry = Arc::clone(&state.registry);

        let runner_url = spawn_stub_runner(vec!["encoding"], "completed").await;
        registry.register(
            runner_url.clone(),
            "runner-1".to_string(),
            "runner-token".to_string(),
            "1.0.0".to_string(),
            vec!["encoding".to_string()],
        );

        let base_url = spawn_app(state).await;
        let client = reqwest::Client::new();

        let notify_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let notify_addr = notify_listener.local_addr().unwrap();
        let notify_router = Router::new().route("/hook", axum_post(|| async { StatusCode::OK }));
        tokio::spawn(async move {
            axum::serve(notify_listener, notify_router).await.unwrap();
        });

        let submit_response = client
            .post(format!("{}{}", base_url, shared::api::endpoints::TASK_EXECUTE))
            .header("X-API-Token", "test-token")
            .json(&serde_json::json!({
                "etab_name": "example-univ",
                "app_name": "studio",
                "task_type": "encoding",
                "source_url": "http://127.0.0.1:1/a.mp4",
                "notify_url": format!("http://{}/hook", notify_addr),
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(submit_response.status(), StatusCode::OK);
        let body: TaskRequestResponse = submit_response.json().await.unwrap();

        let mut status = String::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let status_response = client
                .get(format!("{}/task/status/{}", base_url, body.task_id))
                .header("X-API-Token", "test-token")
                .send()
                .await
                .unwrap();
            let status_body: serde_json::Value = status_response.json().await.unwrap();
            status = status_body["status"].as_str().unwrap().to_string();
            if status == "completed" {
                break;
            }
        }

        assert_eq!(status, "completed");
    }
}
