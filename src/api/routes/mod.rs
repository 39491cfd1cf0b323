pub mod chat;
pub mod documents;
pub mod health;
pub mod onace;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::{middleware, routing::get, routing::post, Router};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{middleware::request_logger, state::AppState};

/// Room for multipart framing and the metadata fields around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.config.cors.allowed_origins);
    let upload_limit = state.config.config.indexing.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route(
            "/documents/upload",
            post(documents::upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/documents", get(documents::list_documents))
        .route(
            "/documents/{id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/documents/{id}/index",
            get(documents::get_index_status).post(documents::rebuild_index),
        )
        .route("/qa", post(chat::qa_handler))
        .route("/chat", post(chat::chat_handler))
        .route("/onace/categories", get(onace::list_categories))
        .route("/onace/categories/{code}", get(onace::get_category))
        .route("/onace/parse-codes", post(onace::parse_codes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logger))
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::application::{DocumentService, IndexScheduler, RagOptions, RagService};
    use crate::domain::{ports::LlmService, DomainError};
    use crate::infrastructure::{AppConfig, DefaultExtractor, FsDocumentStore, HashedEmbedding};

    const BOUNDARY: &str = "X-BOUNDARY";

    struct EchoLlm;

    #[async_trait]
    impl LlmService for EchoLlm {
        async fn complete(&self, prompt: &str) -> Result<String, DomainError> {
            Ok(prompt.to_string())
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            prompt: &str,
        ) -> Result<String, DomainError> {
            Ok(prompt.to_string())
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    fn app_state(dir: &TempDir) -> AppState {
        app_state_with(dir, Some(Arc::new(EchoLlm) as Arc<dyn LlmService>))
    }

    fn app_state_with(dir: &TempDir, llm: Option<Arc<dyn LlmService>>) -> AppState {
        let store = FsDocumentStore::open(dir.path().join("documents"), dir.path().join("embeddings"))
            .unwrap();
        let embedding = Arc::new(HashedEmbedding::new(16));
        let documents = Arc::new(DocumentService::new(
            Arc::new(store.clone()),
            Arc::new(DefaultExtractor),
            embedding.clone(),
        ));
        let rag = Arc::new(RagService::new(
            documents.clone(),
            embedding,
            llm,
            RagOptions {
                top_k: 3,
                query_expansions: 0,
                system_prompt: "system".into(),
                expansion_prompt: "expand".into(),
            },
        ));
        let scheduler = Arc::new(IndexScheduler::new(documents.clone(), 2));
        AppState::new(documents, rag, scheduler, store, AppConfig::default())
    }

    fn upload_request(filename: &str, mime: &str, content: &str, codes: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: {mime}\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"industry_codes\"\r\n\r\n\
             {codes}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::post("/documents/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(&app_state(&dir), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let request = Request::get("/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");

        let response = create_router(state).oneshot(get("/health")).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_ready_waits_for_reconciliation() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let (status, body) = send(&state, get("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["storage"], "writable");
        assert_eq!(body["llm_model"], "echo");

        state.mark_reconciled();
        let (status, _) = send(&state, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_startup_reconciliation_retries_until_it_succeeds() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let record = state
            .documents
            .put_document(
                b"pending text".to_vec(),
                "pending.txt",
                Some("text/plain"),
                Default::default(),
            )
            .await
            .unwrap();

        // Hide the namespace so the first passes fail.
        let documents_dir = dir.path().join("documents");
        let hidden = dir.path().join("hidden");
        std::fs::rename(&documents_dir, &hidden).unwrap();

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .reconcile_until_ready(std::time::Duration::from_millis(10))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!state.is_reconciled());

        std::fs::rename(&hidden, &documents_dir).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(state.is_reconciled());
        assert!(state.scheduler.job(record.id).is_some());
    }

    #[tokio::test]
    async fn test_upload_index_and_delete() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let (status, body) = send(
            &state,
            upload_request("report.txt", "text/plain", "first page\x0csecond page", "a, C"),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["filename"], "report.txt");
        assert_eq!(body["metadata"]["industry_codes"], serde_json::json!(["A", "C"]));
        let id = body["id"].as_str().unwrap().to_string();

        state.scheduler.drain().await;
        let (status, body) = send(&state, get(&format!("/documents/{id}/index"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"]["state"], "current");
        assert_eq!(body["index"]["passages"], 2);
        assert_eq!(body["job"]["status"], "completed");

        let (_, list) = send(&state, get("/documents")).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let delete = Request::delete(format!("/documents/{id}")).body(Body::empty()).unwrap();
        let (status, _) = send(&state, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&state, get(&format!("/documents/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "document_not_found");
    }

    #[tokio::test]
    async fn test_rejected_uploads() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let (status, body) = send(&state, upload_request("tool.exe", "application/x-msdownload", "MZ", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_input");

        let (status, _) = send(&state, upload_request("empty.txt", "text/plain", "", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_id_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (status, _) = send(&app_state(&dir), get("/documents/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_qa_before_indexing_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        state
            .documents
            .put_document(
                b"pending text".to_vec(),
                "pending.txt",
                None,
                Default::default(),
            )
            .await
            .unwrap();

        let (status, body) = send(
            &state,
            json_request(Method::POST, "/qa", serde_json::json!({ "question": "text?" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "index_not_ready");
    }

    #[tokio::test]
    async fn test_chat_answers_with_sources() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        send(&state, upload_request("bikes.txt", "text/plain", "bicycle parking rules", "")).await;
        state.scheduler.drain().await;

        let (status, body) = send(
            &state,
            json_request(
                Method::POST,
                "/chat",
                serde_json::json!({
                    "message": "bicycle parking",
                    "history": [{ "role": "user", "content": "hello" }],
                    "industry_code": "c",
                    "meta_information": "We build bicycles."
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sources"], serde_json::json!(["bikes.txt"]));
        assert_eq!(body["expanded_queries"], serde_json::json!([]));
        assert_eq!(body["relevant_links"], serde_json::json!([]));
        assert!(body["answer"]
            .as_str()
            .unwrap()
            .contains("[Chunk 1 - Source: bikes.txt]"));
    }

    #[tokio::test]
    async fn test_qa_without_language_model_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let state = app_state_with(&dir, None);

        let (status, body) = send(
            &state,
            json_request(Method::POST, "/qa", serde_json::json!({ "question": "water?" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "unavailable");
    }

    #[tokio::test]
    async fn test_qa_validates_input() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        for body in [
            serde_json::json!({ "question": "  " }),
            serde_json::json!({ "question": "q", "top_k": 0 }),
            serde_json::json!({ "question": "q", "industry_code": "ZZ" }),
        ] {
            let (status, _) = send(&state, json_request(Method::POST, "/qa", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_onace_routes() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let (_, list) = send(&state, get("/onace/categories")).await;
        assert_eq!(list.as_array().unwrap().len(), 22);

        let (status, category) = send(&state, get("/onace/categories/c")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(category["code"], "C");

        let (status, _) = send(&state, get("/onace/categories/Q9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, parsed) = send(
            &state,
            json_request(
                Method::POST,
                "/onace/parse-codes",
                serde_json::json!({ "codes": "b, X" }),
            ),
        )
        .await;
        assert_eq!(parsed["codes"], serde_json::json!(["B"]));
    }
}
