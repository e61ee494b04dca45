//! HTTP surface of the datashell orchestrator
//!
//! Provides:
//! - `GET /health`
//! - `GET /api/v1/tools` and `POST /api/v1/tools/:tool`
//! - `POST /mcp` (JSON-RPC 2.0)

pub mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::mcp::handler::mcp_handler;
use crate::AppState;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/mcp", post(mcp_handler))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tools", get(handlers::tools::list_tools))
        .route("/tools/:tool", post(handlers::tools::call_tool))
}
