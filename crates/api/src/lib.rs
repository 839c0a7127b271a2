//! Artisan HTTP adapter.
//!
//! Exposes config, state, error handling, handlers and the router builder so
//! integration tests and the binary entrypoint share them. Handlers only
//! translate between HTTP and [`artisan_pipeline::GenerationService`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
