use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub storage: String,
    pub reconciled: bool,
    pub llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    pub schema_version: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let store = state.store.clone();
    let writable = tokio::task::spawn_blocking(move || store.is_writable())
        .await
        .unwrap_or(false);
    let reconciled = state.is_reconciled();
    let is_ready = writable && reconciled;

    let response = ReadinessResponse {
        status: if is_ready { "ready" } else { "not_ready" }.into(),
        storage: if writable { "writable" } else { "unavailable" }.into(),
        reconciled,
        llm: state.rag.has_llm(),
        llm_model: state.rag.llm_model().map(str::to_owned),
        schema_version: state.documents.schema_version(),
    };

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
