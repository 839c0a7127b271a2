use artisan_core::artifact::ArtifactError;
use artisan_core::error::CoreError;
use artisan_db::StoreError;
use artisan_pipeline::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`ServiceError`] for pipeline errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A request the adapter could not decode.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Service(err.into())
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Service(ServiceError::Store(StoreError::Core(core))) => classify_core_error(core),
            AppError::Service(ServiceError::Store(err)) => {
                tracing::error!(error = %err, "Job store error");
                internal()
            }
            AppError::Service(ServiceError::Artifact(ArtifactError::NotFound(name))) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Artifact {name} not found"),
            ),
            AppError::Service(ServiceError::Artifact(err)) => {
                tracing::error!(error = %err, "Artifact store error");
                internal()
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::InvalidTransition { id, from, .. } => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {id} is already {from}"),
        ),
        CoreError::LeaseLost { id } => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {id} is owned by another worker"),
        ),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
