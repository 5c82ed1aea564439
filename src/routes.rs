//! HTTP surface: `/api/doc-ai/*` handlers, CORS policy and router assembly.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::HeaderValue,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ConfigError;
use crate::error::AppError;
use crate::schema::{DocumentMime, NationalIdResponse, ProcessorRole, RawDocument};
use crate::service::IdService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: IdService,
    pub expose_error_trace: bool,
}

pub fn router(state: AppState, cors: CorsLayer, max_upload_bytes: usize) -> Router {
    let doc_ai = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/test-connection", post(test_connection))
        .route("/process-front", post(process_front))
        .route("/process-rear", post(process_rear))
        .route("/process-auto", post(process_auto));

    Router::new()
        .route("/", get(root))
        .nest("/api/doc-ai", doc_ai)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Only the listed origins, any method and header, with credentials.
///
/// Wildcards cannot be combined with credentials, so methods and headers
/// mirror the preflight request instead.
pub fn cors_layer(origins: &[&str]) -> Result<CorsLayer, ConfigError> {
    let origins = origins
        .iter()
        .map(|origin| {
            origin
                .trim_end_matches('/')
                .parse::<HeaderValue>()
                .map_err(|e| ConfigError::Invalid {
                    name: "CLIENT_ORIGIN",
                    reason: format!("{:?}: {}", origin, e),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to Document AI API",
        "endpoints": {
            "health_check": "/api/doc-ai/",
            "test_connection": "/api/doc-ai/test-connection",
            "process_front": "/api/doc-ai/process-front",
            "process_rear": "/api/doc-ai/process-rear",
            "process_auto": "/api/doc-ai/process-auto",
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "message": "Document AI Service is running!",
        "status": "healthy",
    }))
}

/// Resolve both processors against the remote service.
async fn test_connection(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let service = &state.service;
    info!(
        "Testing connection to {} and {}",
        service.processor_name(ProcessorRole::Front),
        service.processor_name(ProcessorRole::Rear)
    );
    let (front, rear) = tokio::try_join!(
        service.resolve_processor(ProcessorRole::Front),
        service.resolve_processor(ProcessorRole::Rear),
    )
    .map_err(|e| AppError::remote("Failed to connect to Document AI", e, state.expose_error_trace))?;

    Ok(Json(json!({
        "success": true,
        "message": "Successfully connected to Google Document AI",
        "processors": {
            "front": front,
            "rear": rear,
        }
    })))
}

async fn process_front(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<NationalIdResponse>, AppError> {
    let document = read_upload(&mut multipart).await?;

    let (front, raw_text) = state
        .service
        .process_front(&document)
        .await
        .map_err(|e| AppError::remote("Error processing front ID", e, state.expose_error_trace))?;

    Ok(Json(NationalIdResponse::front(front, raw_text)))
}

async fn process_rear(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<NationalIdResponse>, AppError> {
    let document = read_upload(&mut multipart).await?;

    let (rear, raw_text) = state
        .service
        .process_rear(&document)
        .await
        .map_err(|e| AppError::remote("Error processing rear ID", e, state.expose_error_trace))?;

    Ok(Json(NationalIdResponse::rear(rear, raw_text)))
}

/// Run both processors and report which side(s) the upload contained.
async fn process_auto(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<NationalIdResponse>, AppError> {
    let document = read_upload(&mut multipart).await?;
    let result = state.service.process_both_sides(&document).await;

    Ok(Json(NationalIdResponse {
        success: true,
        message: result.outcome.message().to_string(),
        processor_used: result.outcome.processor_type(),
        front_data: result.front,
        rear_data: result.rear,
        raw_text: result.raw_text,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Pull the `file` part out of the form, checking its type before reading it.
async fn read_upload(multipart: &mut Multipart) -> Result<RawDocument, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::Upload)?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let mime = content_type
            .as_deref()
            .and_then(DocumentMime::parse)
            .ok_or_else(|| AppError::unsupported_type(content_type.as_deref().unwrap_or("(none)")))?;
        let filename = field.file_name().unwrap_or("document").to_string();

        let content = field.bytes().await.map_err(AppError::Upload)?.to_vec();

        if content.is_empty() {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }

        info!(
            "Received file: {} ({} bytes, {}, sha256 {})",
            filename,
            content.len(),
            mime.as_str(),
            fingerprint(&content)
        );
        return Ok(RawDocument::new(content, mime));
    }

    Err(AppError::InvalidInput("No file uploaded".to_string()))
}

/// Short content hash for correlating uploads in logs.
fn fingerprint(data: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(data));
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{extraction, StubClient};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----relay-test-boundary";
    const DEV_ORIGIN: &str = "http://localhost:5500";

    fn app_with(stub: Arc<StubClient>) -> Router {
        app_with_limit(stub, 1024 * 1024)
    }

    fn app_with_limit(stub: Arc<StubClient>, max_upload_bytes: usize) -> Router {
        let state = AppState {
            service: IdService::new(stub),
            expose_error_trace: true,
        };
        let cors = cors_layer(&[DEV_ORIGIN, "https://doc-ai.example.com/"]).unwrap();
        router(state, cors, max_upload_bytes)
    }

    fn full_stub() -> Arc<StubClient> {
        Arc::new(StubClient::new(
            Some(extraction(
                "FRONT TEXT",
                &[("unique_id_number", "1234-5678-9012"), ("last_name", "Dela Cruz")],
            )),
            Some(extraction("REAR TEXT", &[("issued_date", "2023-01-15")])),
        ))
    }

    fn upload(uri: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        multipart_request(uri, Some(content_type), data)
    }

    fn multipart_request(uri: &str, content_type: Option<&str>, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"national-id\"\r\n",
        );
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let app = app_with(full_stub());
        let req = Request::builder()
            .uri("/api/doc-ai/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let app = app_with(full_stub());
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let json = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["endpoints"]["process_auto"], "/api/doc-ai/process-auto");
    }

    #[tokio::test]
    async fn process_front_for_every_supported_type() {
        for mime in ["image/jpeg", "image/png", "application/pdf"] {
            let app = app_with(full_stub());
            let response = app
                .oneshot(upload("/api/doc-ai/process-front", mime, b"\x89PNG fake"))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "{mime}");
            let json = body_json(response).await;
            assert_eq!(json["processor_used"], "front");
            assert_eq!(json["message"], "Front ID processed successfully");
            assert!(json["rear_data"].is_null());
            assert_eq!(json["front_data"]["last_name"], "Dela Cruz");
            assert!(json["front_data"]["first_name"].is_null());
            assert_eq!(json["raw_text"], "FRONT TEXT");
        }
    }

    #[tokio::test]
    async fn process_rear_returns_rear_only() {
        let app = app_with(full_stub());
        let response = app
            .oneshot(upload("/api/doc-ai/process-rear", "image/jpeg", b"jpeg"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["processor_used"], "rear");
        assert!(json["front_data"].is_null());
        assert_eq!(json["rear_data"]["issued_date"], "2023-01-15");
    }

    #[tokio::test]
    async fn unsupported_type_never_reaches_remote() {
        for uri in [
            "/api/doc-ai/process-front",
            "/api/doc-ai/process-rear",
            "/api/doc-ai/process-auto",
        ] {
            let stub = full_stub();
            let app = app_with(stub.clone());
            let response = app.oneshot(upload(uri, "image/gif", b"GIF89a")).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let json = body_json(response).await;
            assert_eq!(
                json["detail"],
                "Unsupported file type: image/gif. Please upload JPEG, PNG, or PDF."
            );
            assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn missing_content_type_is_named_in_error() {
        let stub = full_stub();
        let app = app_with(stub.clone());
        let response = app
            .oneshot(multipart_request("/api/doc-ai/process-front", None, b"bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(
            json["detail"],
            "Unsupported file type: (none). Please upload JPEG, PNG, or PDF."
        );
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let stub = full_stub();
        let app = app_with_limit(stub.clone(), 1024);
        let response = app
            .oneshot(upload("/api/doc-ai/process-auto", "application/pdf", &[b'x'; 8 * 1024]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let stub = full_stub();
        let app = app_with(stub.clone());
        let response = app
            .oneshot(upload("/api/doc-ai/process-auto", "application/pdf", b""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_failure_on_single_side_is_500() {
        let stub = Arc::new(StubClient::new(None, None));
        let app = app_with(stub);
        let response = app
            .oneshot(upload("/api/doc-ai/process-front", "image/png", b"png"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Error processing front ID: "));
        assert!(json["trace"].is_string());
    }

    #[tokio::test]
    async fn process_auto_both_sides() {
        let app = app_with(full_stub());
        let response = app
            .oneshot(upload("/api/doc-ai/process-auto", "application/pdf", b"%PDF"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["processor_used"], "both");
        assert_eq!(json["message"], "Both front and rear ID data extracted successfully");
        assert_eq!(json["raw_text"], "FRONT:\nFRONT TEXT\n\nREAR:\nREAR TEXT");
    }

    #[tokio::test]
    async fn process_auto_rear_when_front_fails() {
        let stub = Arc::new(StubClient::new(
            None,
            Some(extraction("REAR TEXT", &[("issued_date", "2023-01-15")])),
        ));
        let app = app_with(stub);
        let response = app
            .oneshot(upload("/api/doc-ai/process-auto", "image/jpeg", b"jpeg"))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["processor_used"], "rear");
        assert_eq!(json["message"], "Rear ID data extracted successfully");
        assert!(json["front_data"].is_null());
    }

    #[tokio::test]
    async fn process_auto_nothing_found_still_succeeds() {
        let stub = Arc::new(StubClient::new(None, None));
        let app = app_with(stub);
        let response = app
            .oneshot(upload("/api/doc-ai/process-auto", "image/png", b"png"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["processor_used"], "front");
        assert_eq!(json["message"], "Document processed but no ID data found");
        assert!(json["front_data"].is_null());
        assert!(json["rear_data"].is_null());
        assert_eq!(json["raw_text"], "");
    }

    #[tokio::test]
    async fn test_connection_reports_processors() {
        let app = app_with(full_stub());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/doc-ai/test-connection")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(
            json["processors"]["rear"],
            "projects/demo/locations/us/processors/rear01"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_500() {
        let stub = Arc::new(StubClient::new(None, None));
        let app = app_with(stub);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/doc-ai/test-connection")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Failed to connect to Document AI: "));
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/doc-ai/process-auto")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let app = app_with(full_stub());
        let response = app.oneshot(preflight(DEV_ORIGIN)).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], DEV_ORIGIN);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
    }

    #[tokio::test]
    async fn cors_rejects_other_origin() {
        let app = app_with(full_stub());
        let response = app.oneshot(preflight("https://evil.example.net")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn cors_rejects_unparseable_origin() {
        assert!(cors_layer(&["http://bad\norigin"]).is_err());
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let fp = fingerprint(b"hello");
        assert_eq!(fp, "2cf24dba5fb0");
    }
}
