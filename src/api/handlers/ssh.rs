//! SSH session handlers: connect, disconnect, count.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::api::dto::{ConnectRequest, ConnectResponse, SessionCountResponse};
use crate::app_state::AppState;
use crate::domain::{CleanupReason, SessionId};
use crate::error::{ErrorResponse, GatewayError};
use crate::ssh::SshTarget;

/// `POST /ssh/connect` — Open an SSH session.
///
/// Authenticates against the remote host and registers the connection. The
/// PTY is only allocated once a WebSocket binds to the returned id.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for missing fields or malformed
/// JSON, [`GatewayError::AuthenticationFailed`] for rejected credentials and
/// [`GatewayError::ConnectionFailed`] when the host cannot be reached.
#[utoipa::path(
    post,
    path = "/api/v1/ssh/connect",
    tag = "SSH",
    summary = "Open an SSH session",
    description = "Dials the remote host, authenticates with the supplied password and registers a session. Stream it through `/ws/ssh/{session_id}`.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Session created", body = ConnectResponse),
        (status = 400, description = "Missing required fields", body = ErrorResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 502, description = "Remote host unreachable", body = ErrorResponse),
    )
)]
pub async fn connect(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let Json(req) = payload.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let target = SshTarget::from_parts(req.hostname, req.port, req.username, req.password)?;
    let label = target.label();

    let connection = state.bridge.connect(&target).await.inspect_err(|e| {
        tracing::warn!(ssh_target = %label, error = %e, "ssh connect failed");
    })?;
    let session = state.registry.create(label, connection).await;

    Ok((
        StatusCode::OK,
        Json(ConnectResponse {
            session_id: session.id().to_string(),
            status: "connected".to_string(),
            target: session.target().to_string(),
            created_at: session.created_at(),
        }),
    ))
}

/// `DELETE /ssh/sessions/:id` — Close a session.
///
/// # Errors
///
/// Returns [`GatewayError::SessionNotFound`] if the id is malformed or not
/// live.
#[utoipa::path(
    delete,
    path = "/api/v1/ssh/sessions/{id}",
    tag = "SSH",
    summary = "Close an SSH session",
    description = "Closes the bound WebSocket (after a final status message), the remote shell and the SSH connection.",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| GatewayError::SessionNotFound(id.clone()))?;
    if !state
        .registry
        .cleanup(&session_id, CleanupReason::Disconnect)
        .await
    {
        return Err(GatewayError::session_not_found(&session_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /ssh/sessions` — Number of live sessions.
#[utoipa::path(
    get,
    path = "/api/v1/ssh/sessions",
    tag = "SSH",
    summary = "Count live sessions",
    responses(
        (status = 200, description = "Live session count", body = SessionCountResponse),
    )
)]
pub async fn count(State(state): State<AppState>) -> impl IntoResponse {
    Json(SessionCountResponse {
        count: state.registry.count().await,
    })
}

/// SSH routes, nested under `/api/v1` by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ssh/connect", post(connect))
        .route("/ssh/sessions", get(count))
        .route("/ssh/sessions/{id}", delete(disconnect))
}
