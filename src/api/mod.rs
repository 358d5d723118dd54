//! Agent HTTP routes
//!
//! - `POST /v1/certificates` stores key, certificate and CA material
//! - `GET /health` liveness probe

use axum::{routing::get, Router};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::AgentState;

mod certificates;
mod health;

pub use health::*;

/// Versioned API routes
pub fn routes() -> Router<AgentState> {
    Router::new().nest("/v1/certificates", certificates::routes())
}

/// Full agent router with request tracing
pub fn create_router(state: AgentState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(routes())
        .with_state(state)
        .layer(trace_layer)
}
