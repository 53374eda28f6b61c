//! HTTP API over [`OcrService`].
//!
//! | Method | Path                     | Purpose                               |
//! |--------|--------------------------|---------------------------------------|
//! | POST   | `/v1/jobs`               | Submit a PDF or image, 202 + id       |
//! | GET    | `/v1/jobs/{id}`          | Job status                            |
//! | GET    | `/v1/jobs/{id}/result`   | Searchable PDF (terminal jobs only)   |
//! | GET    | `/v1/jobs/{id}/text`     | Text layer of the result, per page    |
//! | POST   | `/v1/jobs/{id}/cancel`   | Cooperative cancellation              |
//! | GET    | `/health`                | Pool and job counts                   |
//!
//! Submission options travel on the query string
//! (`?languages=pan+eng&failure_policy=best-effort&existing_text=ocr`), the
//! document is the raw request body. The body is sniffed, so the
//! `Content-Type` header is not consulted.

use crate::error::{OcrError, ValidationError};
use crate::job::{CancelOutcome, JobId, JobState, JobStatus};
use crate::pipeline::validate::SubmitOptions;
use crate::service::{ExtractedText, Health, OcrService};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Seconds a client is told to wait after a full queue.
const RETRY_AFTER_SECS: u64 = 5;

/// Application state
pub struct AppState {
    pub service: Arc<OcrService>,
}

/// Build the API router
pub fn router(service: Arc<OcrService>) -> Router {
    // Slack over the document limit so the validator, not the body
    // extractor, reports oversized uploads.
    let body_limit = service
        .config()
        .max_document_bytes
        .saturating_add(64 * 1024);
    let state = Arc::new(AppState { service });

    let jobs = Router::new()
        .route(
            "/jobs",
            post(submit_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/jobs/{id}", get(status_handler))
        .route("/jobs/{id}/result", get(result_handler))
        .route("/jobs/{id}/text", get(text_handler))
        .route("/jobs/{id}/cancel", post(cancel_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", jobs)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Responses ===

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub page_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_pages: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

// === Handlers ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(state.service.health())
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Query(options): Query<SubmitOptions>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.service.submit(body.to_vec(), options).await?;
    let status = state.service.status(id)?;
    let location = format!("/v1/jobs/{id}");
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(SubmitResponse {
            job_id: id,
            state: status.state,
            page_count: status.page_count,
        }),
    ))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id = parse_id(&id)?;
    let status = state.service.status(id)?;
    Ok(Json(JobStatus::clone(&*status)))
}

async fn result_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let pdf = state.service.result(id).await?;
    let disposition = format!("attachment; filename=\"{id}.pdf\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    )
        .into_response())
}

async fn text_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExtractedText>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.text(id).await?))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state.service.cancel(id)?;
    let current = state.service.status(id)?.state;

    // Idempotent: every outcome is accepted, the body says which one applied.
    let (outcome, running_pages) = match outcome {
        CancelOutcome::Cancelled => ("cancelled", None),
        CancelOutcome::Draining { running } => ("draining", Some(running)),
        CancelOutcome::AlreadyRequested => ("already_requested", None),
        CancelOutcome::AlreadyFinished(_) => ("already_finished", None),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: id,
            state: current,
            outcome,
            running_pages,
        }),
    ))
}

fn parse_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::BadJobId(raw.to_string()))
}

// === Errors ===

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Service(OcrError),
    /// Path segment is not a job id. Reported like an unknown job.
    BadJobId(String),
}

impl From<OcrError> for ApiError {
    fn from(err: OcrError) -> Self {
        ApiError::Service(err)
    }
}

/// HTTP status for a service error.
pub fn status_code(err: &OcrError) -> StatusCode {
    match err {
        OcrError::Validation(ValidationError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        OcrError::Validation(ValidationError::UnsupportedLanguage { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OcrError::Validation(_) => StatusCode::BAD_REQUEST,
        OcrError::ResourceExhausted { .. } | OcrError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OcrError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        OcrError::NotReady { .. } | OcrError::NoArtifact { .. } => StatusCode::CONFLICT,
        OcrError::Assembly(_)
        | OcrError::Storage { .. }
        | OcrError::InvalidConfig(_)
        | OcrError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Stable machine-readable code for a service error.
pub fn error_code(err: &OcrError) -> &'static str {
    match err {
        OcrError::Validation(v) => match v {
            ValidationError::Malformed { .. } => "malformed_document",
            ValidationError::TooLarge { .. } => "document_too_large",
            ValidationError::EmptyDocument => "empty_document",
            ValidationError::Encrypted => "encrypted_document",
            ValidationError::InvalidLanguage { .. } => "invalid_language",
            ValidationError::UnsupportedLanguage { .. } => "unsupported_language",
            ValidationError::PageLimitExceeded { .. } => "page_limit_exceeded",
        },
        OcrError::ResourceExhausted { .. } => "resource_exhausted",
        OcrError::ShuttingDown => "shutting_down",
        OcrError::JobNotFound { .. } => "job_not_found",
        OcrError::NotReady { .. } => "not_ready",
        OcrError::NoArtifact { .. } => "no_artifact",
        OcrError::Assembly(_) => "assembly_failed",
        OcrError::Storage { .. } => "storage_error",
        OcrError::InvalidConfig(_) => "invalid_config",
        OcrError::Internal(_) => "internal_error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Service(err) => err,
            ApiError::BadJobId(raw) => {
                let response = ErrorResponse {
                    message: format!("Job not found: {raw}"),
                    code: Some("job_not_found".to_string()),
                    details: None,
                    retry_after_secs: None,
                };
                return (StatusCode::NOT_FOUND, Json(response)).into_response();
            }
        };

        let status = status_code(&err);
        let (details, retry_after_secs) = match &err {
            OcrError::ResourceExhausted {
                requested,
                available,
                capacity,
            } => (
                Some(serde_json::json!({
                    "requested_pages": requested,
                    "available_slots": available,
                    "capacity": capacity,
                })),
                Some(RETRY_AFTER_SECS),
            ),
            OcrError::NotReady { state, .. } | OcrError::NoArtifact { state, .. } => {
                (Some(serde_json::json!({ "state": state })), None)
            }
            _ => (None, None),
        };
        if status.is_server_error() {
            tracing::error!(code = error_code(&err), "Request failed: {err}");
        }

        let response = ErrorResponse {
            message: err.to_string(),
            code: Some(error_code(&err).to_string()),
            details,
            retry_after_secs,
        };
        let mut res = (status, Json(response)).into_response();
        if let Some(secs) = retry_after_secs {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        res
    }
}
