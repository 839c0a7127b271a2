//! Domain types and sandboxed side effects for the Artisan generation pipeline.
//!
//! Holds the job model and its forward-only state machine, the closed error
//! taxonomy, submission parameters, the retry policy, the artifact store and
//! the renderer execution engine. Nothing here talks to the job database or
//! the generative-model service.

pub mod artifact;
pub mod error;
pub mod job;
pub mod parameters;
pub mod retry;
pub mod scripting;
pub mod types;
