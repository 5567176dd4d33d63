//! REST API layer: route handlers, DTOs, router composition and the OpenAPI
//! document.
//!
//! Session endpoints are mounted under `/api/v1`; `/health` sits at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "ssh-tunnel-gateway", description = "SSH sessions streamed over WebSocket"),
    paths(
        handlers::ssh::connect,
        handlers::ssh::disconnect,
        handlers::ssh::count,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::ConnectRequest,
        dto::ConnectResponse,
        dto::SessionCountResponse,
        handlers::system::HealthResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "SSH", description = "Session lifecycle"),
        (name = "System", description = "Service status"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_session_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/ssh/connect"));
        assert!(doc.paths.paths.contains_key("/api/v1/ssh/sessions/{id}"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
