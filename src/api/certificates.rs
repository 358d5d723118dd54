//! Certificate material store endpoint

use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use tracing::error;

use crate::models::{StoreCertificateRequest, StoreCertificateResponse};
use crate::utils::{AgentError, AgentResult};
use crate::AgentState;

/// Create certificate routes
pub fn routes() -> Router<AgentState> {
    Router::new().route("/", post(store_certificate))
}

/// POST /v1/certificates - Persist key, certificate and CA material
async fn store_certificate(
    State(state): State<AgentState>,
    payload: Result<Json<StoreCertificateRequest>, JsonRejection>,
) -> AgentResult<Json<StoreCertificateResponse>> {
    let Json(req) = payload?;

    let agent = state.agent.clone();
    let response = tokio::task::spawn_blocking(move || agent.store_certificate(&req))
        .await
        .map_err(|e| {
            error!("Store certificate task failed: {}", e);
            AgentError::Internal
        })??;

    Ok(Json(response))
}
