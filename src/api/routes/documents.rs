use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::api::{error::ApiError, state::AppState};
use crate::application::IndexJob;
use crate::domain::{onace, DocumentId, DocumentMetadata, DocumentRecord, IndexStatus};

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub index: IndexStatus,
    pub job: Option<IndexJob>,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub document_id: DocumentId,
    pub index: IndexStatus,
    pub job: Option<IndexJob>,
}

fn parse_id(raw: &str) -> Result<DocumentId, ApiError> {
    Ok(raw.parse::<DocumentId>()?)
}

fn parse_bool(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        other => Err(ApiError::bad_request(format!("primary must be a boolean, got {other:?}"))),
    }
}

/// Multipart fields: `file` (required), `industry_codes`, `primary`, `source`.
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let bad_multipart = |e: axum::extract::multipart::MultipartError| ApiError::bad_request(e.body_text());

    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut metadata = DocumentMetadata::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("file field has no filename"))?;
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                file = Some((filename, content_type, bytes.to_vec()));
            }
            "industry_codes" => {
                metadata.industry_codes = onace::parse_codes(&field.text().await.map_err(bad_multipart)?);
            }
            "primary" => metadata.primary = parse_bool(&field.text().await.map_err(bad_multipart)?)?,
            "source" => {
                let source = field.text().await.map_err(bad_multipart)?;
                metadata.source = Some(source.trim().to_string()).filter(|s| !s.is_empty());
            }
            other => tracing::debug!(field = other, "ignoring unknown upload field"),
        }
    }

    let (filename, content_type, content) =
        file.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    if metadata.industry_codes.is_empty() {
        metadata.industry_codes = onace::parse_codes("");
    }

    let record = state
        .documents
        .put_document(content, &filename, content_type.as_deref(), metadata)
        .await?;
    let job = state.scheduler.schedule(record.id, false);

    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentResponse {
            record,
            index: IndexStatus::Missing,
            job: Some(job),
        }),
    ))
}

pub async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = state
        .documents
        .overview()
        .await?
        .into_iter()
        .map(|entry| DocumentResponse {
            job: state.scheduler.job(entry.record.id),
            record: entry.record,
            index: entry.index,
        })
        .collect();
    Ok(Json(documents))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let id = parse_id(&id)?;
    let record = state.documents.get_record(id).await?;
    let index = state.documents.index_status(id).await?;

    Ok(Json(DocumentResponse {
        record,
        index,
        job: state.scheduler.job(id),
    }))
}

pub async fn get_index_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexResponse>, ApiError> {
    let id = parse_id(&id)?;
    let index = state.documents.index_status(id).await?;

    Ok(Json(IndexResponse {
        document_id: id,
        index,
        job: state.scheduler.job(id),
    }))
}

/// Schedules a forced rebuild.
pub async fn rebuild_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IndexResponse>), ApiError> {
    let id = parse_id(&id)?;
    let index = state.documents.index_status(id).await?;
    let job = state.scheduler.schedule(id, true);

    Ok((
        StatusCode::ACCEPTED,
        Json(IndexResponse {
            document_id: id,
            index,
            job: Some(job),
        }),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.documents.delete(id).await?;
    state.scheduler.forget(id);
    Ok(StatusCode::NO_CONTENT)
}
