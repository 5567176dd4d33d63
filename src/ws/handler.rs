//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::GatewayError;

/// `GET /ws/ssh/:id` — Upgrade to a WebSocket streaming the session.
///
/// The session is looked up before the upgrade is examined, so an unknown
/// id is answered with 404 and no protocol switch.
///
/// # Errors
///
/// Returns [`GatewayError::SessionNotFound`] for malformed or unknown ids
/// and [`GatewayError::InvalidRequest`] for requests that are not valid
/// WebSocket upgrades.
pub async fn ws_ssh_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| GatewayError::SessionNotFound(id.clone()))?;
    if !state.registry.contains(&session_id).await {
        return Err(GatewayError::session_not_found(&session_id));
    }
    let ws = ws.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;

    tracing::debug!(%session_id, "upgrading websocket");
    Ok(ws
        .on_upgrade(move |socket| run_connection(socket, session_id, state))
        .into_response())
}
