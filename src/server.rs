//! HTTP surface
//!
//! Four routes: the webhook itself, a health/status probe, the upload Mini
//! App page, and the two upload API endpoints.

use crate::app::{ingress, upload, Service};
use crate::error::AppError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the router over the shared service
pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/", post(webhook).get(status))
        .route("/upload", get(upload_page))
        .route("/api/signed-url", post(signed_url))
        .route("/api/process", post(process_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// POST / — accept one platform update
async fn webhook(State(service): State<Arc<Service>>, Json(body): Json<Value>) -> Json<Value> {
    let update = match serde_json::from_value(body) {
        Ok(update) => update,
        Err(e) => {
            log::warn!("Unparseable update: {e}");
            return Json(json!({"ok": true, "result": "ignored"}));
        }
    };
    let result = ingress::handle_update(&service, update).await;
    Json(json!({"ok": true, "result": result}))
}

/// GET / — health and build info
async fn status(State(service): State<Arc<Service>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "talkscribe",
        "region": service.config.region,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /upload — the static file-picker page
async fn upload_page() -> Html<&'static str> {
    Html(include_str!("../assets/upload.html"))
}

// ===== Upload API DTOs =====

#[derive(Debug, Deserialize)]
struct SignedUrlRequest {
    ext: String,
    init_data: String,
}

#[derive(Debug, Serialize)]
struct SignedUrlResponse {
    put_url: String,
    oss_key: String,
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    oss_key: String,
    init_data: String,
    #[serde(default)]
    filename: String,
}

fn error_response(e: AppError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
        AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"ok": false, "error": e.to_string()})))
}

/// POST /api/signed-url — issue a short-lived PUT URL
async fn signed_url(
    State(service): State<Arc<Service>>,
    Json(request): Json<SignedUrlRequest>,
) -> Result<Json<SignedUrlResponse>, (StatusCode, Json<Value>)> {
    upload::issue_signed_url(&service, &request.ext, &request.init_data)
        .await
        .map(|(put_url, oss_key)| Json(SignedUrlResponse { put_url, oss_key }))
        .map_err(error_response)
}

/// POST /api/process — enqueue a job for an uploaded object
async fn process_upload(
    State(service): State<Arc<Service>>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    upload::process_upload(
        &service,
        &request.oss_key,
        &request.init_data,
        &request.filename,
    )
    .await
    .map(|job_id| Json(json!({"ok": true, "job_id": job_id})))
    .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let (status, _) = error_response(AppError::Unauthorized("x".to_string()));
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = error_response(AppError::InvalidInput("x".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = error_response(AppError::Queue("x".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_signed_url_request_parse() {
        let request: SignedUrlRequest =
            serde_json::from_str(r#"{"ext": "mp3", "init_data": "user=x&hash=y"}"#).unwrap();
        assert_eq!(request.ext, "mp3");
    }

    #[test]
    fn test_process_request_default_filename() {
        let request: ProcessRequest =
            serde_json::from_str(r#"{"oss_key": "uploads/1/a.mp3", "init_data": "x"}"#).unwrap();
        assert_eq!(request.filename, "");
    }
}
