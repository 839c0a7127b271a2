use std::sync::Arc;

use artisan_pipeline::GenerationService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the service is a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub service: GenerationService,
    pub config: Arc<ServerConfig>,
}
