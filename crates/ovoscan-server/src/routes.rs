//! HTTP routes
//!
//! `POST /upload`, `GET /status/{session_id}`, `GET /result/{session_id}` and
//! `GET /health`. Every error is a JSON body `{ "error": ... }`.

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, warn};

use ovoscan_core::{Error, ImageUpload, ResultReport, SessionId, StatusReport};

use crate::state::AppState;

#[derive(Serialize)]
struct UploadResponse {
    session_id: SessionId,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    idle_workers: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

pub fn app_router(state: AppState) -> Router {
    let body_limit = state.max_request_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/status/{session_id}", get(status))
        .route("/result/{session_id}", get(result))
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.service.store().len(),
        idle_workers: state.service.runner().idle_workers(),
    })
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut batch = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(AppError::from)? {
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(AppError::from)?;
        batch.push(ImageUpload::new(filename, data));
    }

    let session_id = state.service.upload(batch)?;
    Ok((StatusCode::CREATED, Json(UploadResponse { session_id })))
}

async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    Ok(Json(state.service.status(&session_id)?))
}

async fn result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ResultReport>, AppError> {
    Ok(Json(state.service.result(&session_id)?))
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    PayloadTooLarge(String),
    NotFound(String),
    NotReady { message: String, status: String },
    JobFailed(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message, status) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::NotReady { message, status } => {
                (StatusCode::CONFLICT, message, Some(status))
            }
            AppError::JobFailed(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                Some("failed".to_string()),
            ),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        let body = Json(ErrorResponse {
            error: message,
            status,
        });
        (code, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => AppError::BadRequest(msg),
            Error::NotFound(_) => AppError::NotFound("session not found".to_string()),
            Error::NotReady { ref phase, .. } => AppError::NotReady {
                status: phase.clone(),
                message: err.to_string(),
            },
            Error::JobFailed(cause) => AppError::JobFailed(cause),
            Error::Capacity(_) => {
                warn!(error = %err, "Rejected upload");
                AppError::Unavailable(err.to_string())
            }
            other => {
                error!(error = %other, "Request failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::BadRequest(err.body_text())
        }
    }
}
