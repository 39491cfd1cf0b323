use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::DomainError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// A handler error rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_input",
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "unavailable",
            message: message.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let (status, code) = match &err {
            DomainError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            DomainError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, "document_not_found"),
            DomainError::IndexNotBuilt(_) => (StatusCode::CONFLICT, "index_not_built"),
            DomainError::AlreadyIndexed(_) => (StatusCode::CONFLICT, "already_indexed"),
            DomainError::IndexingInProgress(_) => (StatusCode::CONFLICT, "indexing_in_progress"),
            DomainError::IndexingFailed { .. } => (StatusCode::BAD_GATEWAY, "indexing_failed"),
            DomainError::IndexingTimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "indexing_timed_out"),
            DomainError::IndexNotReady { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "index_not_ready")
            }
            DomainError::StorageFull(_) => (StatusCode::INSUFFICIENT_STORAGE, "storage_full"),
            DomainError::ExternalService(_) => (StatusCode::BAD_GATEWAY, "external_service"),
            DomainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            DomainError::Io(_) | DomainError::Corrupt(_) | DomainError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %err, code, "request failed");
        } else {
            tracing::debug!(error = %err, code, "request rejected");
        }

        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentId;

    #[test]
    fn test_status_mapping() {
        let id = DocumentId::new();
        let cases = [
            (DomainError::invalid("x"), StatusCode::BAD_REQUEST),
            (DomainError::DocumentNotFound(id), StatusCode::NOT_FOUND),
            (DomainError::IndexNotBuilt(id), StatusCode::CONFLICT),
            (DomainError::IndexingTimedOut(id), StatusCode::GATEWAY_TIMEOUT),
            (DomainError::IndexNotReady { pending: 2 }, StatusCode::SERVICE_UNAVAILABLE),
            (DomainError::StorageFull("disk".into()), StatusCode::INSUFFICIENT_STORAGE),
            (DomainError::corrupt("bad"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
