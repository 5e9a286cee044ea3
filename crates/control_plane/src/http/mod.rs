//! The authenticated HTTP + WebSocket operator surface.
//!
//! Every route except `/login` and the public per-server status probe
//! requires a valid session cookie. Mutating endpoints respond with
//! `{success, message}` on success and `{success: false, error}` with a 4xx
//! status for user errors; internal failures map to 500 with the error text.

pub mod session;
pub mod ws;

use crate::backups::BackupManager;
use crate::commands::parse_operator_command;
use crate::error::SupervisorError;
use crate::ipc::IpcMessage;
use crate::update::UpdateOrchestrator;
use crate::supervisor::{ServerStatus, Supervisor};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use session::{SessionStore, SESSION_COOKIE};
use std::sync::Arc;
use tracing::info;

/// Default number of log entries returned by the tail endpoint.
const DEFAULT_LOG_TAIL: usize = 100;

/// Shared state behind every handler.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub updater: Arc<UpdateOrchestrator>,
    pub backups: Arc<BackupManager>,
    pub sessions: Arc<SessionStore>,
}

/// Builds the full operator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/gui/session", get(session_check))
        .route("/api/server/:id/status", get(server_status))
        .route("/api/server/:id/start", post(server_start))
        .route("/api/server/:id/stop", post(server_stop))
        .route("/api/server/:id/restart", post(server_restart))
        .route("/api/server/:id/command", post(server_command))
        .route("/api/server/:id/logs", get(server_logs))
        .route("/api/server/:id/logs/clear", post(server_logs_clear))
        .route("/api/server/:id/logs/download", get(server_logs_download))
        .route("/api/backups", get(backups_list).post(backups_create))
        .route("/api/backups/:file", delete(backups_delete))
        .route("/api/backups/:file/restore", post(backups_restore))
        .route("/api/git/pull", post(git_pull))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Pulls the session token out of the Cookie header, if present.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Rejects the request unless it carries a valid session cookie.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let authed = match session_token(headers) {
        Some(token) => state.sessions.validate_token(&token).await,
        None => false,
    };
    if authed {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "authentication required" })),
        )
            .into_response())
    }
}

fn ok(message: impl Into<String>) -> Response {
    Json(json!({ "success": true, "message": message.into() })).into_response()
}

/// Maps a supervisor error to a response: user errors get a 4xx, everything
/// else a 500.
fn error_response(e: SupervisorError) -> Response {
    let status = match &e {
        SupervisorError::UnknownServer(_) => StatusCode::NOT_FOUND,
        SupervisorError::AlreadyRunning(_)
        | SupervisorError::NotRunning(_)
        | SupervisorError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct LoginRequest {
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if !state.sessions.verify_credential(&body.password) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "invalid credentials" })),
        )
            .into_response();
    }
    let token = state.sessions.create_session().await;
    info!("🔐 Operator session created");
    let cookie = format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/");
    (
        [(SET_COOKIE, cookie)],
        Json(json!({ "success": true, "message": "logged in" })),
    )
        .into_response()
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.revoke(&token).await;
    }
    let clear = format!("{SESSION_COOKIE}=; Max-Age=0; HttpOnly; Path=/");
    ([(SET_COOKIE, clear)], ok("logged out")).into_response()
}

async fn session_check(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let authenticated = match session_token(&headers) {
        Some(token) => state.sessions.validate_token(&token).await,
        None => false,
    };
    let role = authenticated.then_some("admin");
    Json(json!({ "authenticated": authenticated, "role": role })).into_response()
}

/// Public liveness probe: status, uptime and player count, no registry
/// internals.
async fn server_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.supervisor.snapshot(&id).await {
        Some(snap) => Json(json!({
            "id": id,
            "online": snap.status == ServerStatus::Online,
            "status": snap.status,
            "uptime": snap.uptime_ms,
            "playerCount": snap.player_count,
        }))
        .into_response(),
        None => error_response(SupervisorError::UnknownServer(id)),
    }
}

async fn server_start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.supervisor.start(&id).await {
        Ok(()) => ok(format!("server '{id}' starting")),
        Err(e) => error_response(e),
    }
}

async fn server_stop(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.supervisor.stop(&id).await {
        Ok(()) => ok(format!("server '{id}' stopping")),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
struct RestartRequest {
    #[serde(default, alias = "countdownSecs")]
    countdown: u32,
    #[serde(default)]
    message: Option<String>,
}

async fn server_restart(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RestartRequest>>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let Json(body) = body.unwrap_or_default();
    match state
        .supervisor
        .restart(&id, body.countdown, body.message)
        .await
    {
        Ok(()) => ok(format!("server '{id}' restarting")),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CommandRequest {
    command: String,
}

async fn server_command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CommandRequest>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let Some(message) = parse_operator_command(&body.command) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "empty command" })),
        )
            .into_response();
    };
    if state.supervisor.send_ipc(&id, &message).await {
        ok(format!("command '{}' sent", message.kind))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "no IPC channel to server" })),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct TailQuery {
    limit: Option<usize>,
}

async fn server_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<TailQuery>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let limit = query.limit.unwrap_or(DEFAULT_LOG_TAIL);
    match state.supervisor.logs_tail(&id, limit).await {
        Ok(entries) => Json(json!({ "server": id, "logs": entries })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn server_logs_clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.supervisor.clear_logs(&id).await {
        Ok(()) => ok(format!("logs cleared for '{id}'")),
        Err(e) => error_response(e),
    }
}

async fn server_logs_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let path = match state.supervisor.log_file_path(&id).await {
        Ok(path) => path,
        Err(e) => return error_response(e),
    };
    let body = tokio::fs::read(&path).await.unwrap_or_default();
    let disposition = format!("attachment; filename=\"{id}.log\"");
    (
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

async fn backups_list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.backups.list().await {
        Ok(backups) => Json(json!({ "backups": backups })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateBackupRequest {
    server: String,
    state: Value,
}

async fn backups_create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBackupRequest>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.backups.create(&body.server, &body.state).await {
        Ok(file) => Json(json!({ "success": true, "file": file })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn backups_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    match state.backups.delete(&file).await {
        Ok(()) => ok(format!("backup '{file}' deleted")),
        Err(e) => error_response(e),
    }
}

async fn backups_restore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let path = match state.backups.resolve(&file) {
        Ok(path) => path,
        Err(e) => return error_response(e),
    };
    // The target server is encoded in the backup file name.
    let server = match state.backups.list().await {
        Ok(backups) => backups.into_iter().find(|b| b.file == file).map(|b| b.server),
        Err(e) => return error_response(e),
    };
    let Some(server) = server else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("no such backup: '{file}'") })),
        )
            .into_response();
    };
    let message = IpcMessage::restore_backup(path.to_string_lossy());
    if state.supervisor.send_ipc(&server, &message).await {
        ok(format!("restore of '{file}' requested on '{server}'"))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "no IPC channel to server" })),
        )
            .into_response()
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GitPullRequest {
    #[serde(default)]
    auto_apply: bool,
}

async fn git_pull(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<GitPullRequest>>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let Json(body) = body.unwrap_or_default();
    match state.updater.pull_updates(body.auto_apply).await {
        Ok(outcome) => Json(json!({ "success": true, "outcome": outcome })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp;
    }
    let supervisor = state.supervisor.clone();
    upgrade.on_upgrade(move |socket| ws::run_session(socket, supervisor))
}
