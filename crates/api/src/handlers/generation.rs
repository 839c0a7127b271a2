//! Handlers for job submission, status, download and cancellation.

use artisan_core::error::CoreError;
use artisan_core::job::JobStatus;
use artisan_core::parameters::GenerationRequest;
use artisan_core::types::JobId;
use artisan_pipeline::JobStatusView;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Media type of binary glTF.
pub const GLTF_BINARY: &str = "model/gltf-binary";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Path ids that do not parse are reported like unknown jobs.
fn parse_job_id(raw: &str) -> AppResult<JobId> {
    uuid::Uuid::parse_str(raw).map_err(|_| CoreError::job_not_found(raw).into())
}

/// POST /generate
///
/// Body is the flat request: `prompt` plus the optional attributes.
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job_id = state.service.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /status/{id}
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobStatusView>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.service.status(id).await?))
}

/// GET /model/{id}
///
/// Streams the committed artifact as an attachment named `<id>.glb`.
pub async fn model(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let id = parse_job_id(&id)?;
    let (file, len) = state.service.open_artifact(id).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, GLTF_BINARY)
        .header(CONTENT_LENGTH, len)
        .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{id}.glb\""))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

/// POST /cancel/{id}
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<JobStatusView>)> {
    let id = parse_job_id(&id)?;
    let view = state.service.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}
