use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Generation routes, mounted at the root.
///
/// ```text
/// POST /generate       -> submit a job
/// GET  /status/{id}    -> job status view
/// GET  /model/{id}     -> download the artifact
/// POST /cancel/{id}    -> request cancellation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generation::generate))
        .route("/status/{id}", get(generation::status))
        .route("/model/{id}", get(generation::model))
        .route("/cancel/{id}", post(generation::cancel))
}
