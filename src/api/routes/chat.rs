use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::{error::ApiError, state::AppState};
use crate::application::{Answer, RetrievalRequest};
use crate::domain::{onace, Message};

const MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize)]
pub struct QaRequest {
    pub question: String,
    pub top_k: Option<usize>,
    pub industry_code: Option<String>,
    pub meta_information: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
    pub top_k: Option<usize>,
    pub industry_code: Option<String>,
    pub meta_information: Option<String>,
}

fn retrieval_request(
    state: &AppState,
    query: String,
    top_k: Option<usize>,
    industry_code: Option<String>,
    meta_information: Option<String>,
) -> Result<RetrievalRequest, ApiError> {
    if !state.rag.has_llm() {
        return Err(ApiError::unavailable("no language model is configured"));
    }
    if query.trim().is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }
    if let Some(k) = top_k.filter(|k| !(1..=MAX_TOP_K).contains(k)) {
        return Err(ApiError::bad_request(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {k}"
        )));
    }

    let industry_code = industry_code
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty());
    if let Some(code) = industry_code.as_deref() {
        if onace::category(code).is_none() {
            return Err(ApiError::bad_request(format!("unknown industry code {code:?}")));
        }
    }

    Ok(RetrievalRequest {
        query,
        top_k,
        industry_code,
        meta_information,
    })
}

pub async fn qa_handler(
    State(state): State<AppState>,
    Json(request): Json<QaRequest>,
) -> Result<Json<Answer>, ApiError> {
    let request = retrieval_request(
        &state,
        request.question,
        request.top_k,
        request.industry_code,
        request.meta_information,
    )?;
    Ok(Json(state.rag.answer(&request).await?))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Answer>, ApiError> {
    let history = request.history;
    let request = retrieval_request(
        &state,
        request.message,
        request.top_k,
        request.industry_code,
        request.meta_information,
    )?;
    Ok(Json(state.rag.chat(&request, &history).await?))
}
