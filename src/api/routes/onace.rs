use axum::{extract::Path, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::domain::onace::{self, OnaceCategory};

#[derive(Debug, Deserialize)]
pub struct ParseCodesRequest {
    pub codes: String,
}

#[derive(Debug, Serialize)]
pub struct ParseCodesResponse {
    pub codes: Vec<String>,
    pub categories: Vec<&'static OnaceCategory>,
}

pub async fn list_categories() -> Json<&'static [OnaceCategory]> {
    Json(&onace::CATEGORIES[..])
}

pub async fn get_category(
    Path(code): Path<String>,
) -> Result<Json<&'static OnaceCategory>, ApiError> {
    onace::category(&code.to_ascii_uppercase())
        .map(Json)
        .ok_or_else(|| ApiError {
            status: StatusCode::NOT_FOUND,
            code: "category_not_found",
            message: format!("unknown industry code {code:?}"),
        })
}

pub async fn parse_codes(Json(request): Json<ParseCodesRequest>) -> Json<ParseCodesResponse> {
    let codes = onace::parse_codes(&request.codes);
    let categories = codes.iter().filter_map(|c| onace::category(c)).collect();
    Json(ParseCodesResponse {
        codes: codes.into_iter().collect(),
        categories,
    })
}
