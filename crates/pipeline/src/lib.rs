//! Worker pool, queue dispatcher and service boundary.
//!
//! [`Pipeline::new`] wires a job store, a synthesizer, a renderer and an
//! artifact store into a [`GenerationService`] for submissions and a
//! [`WorkerPool`] that drives jobs to completion.

use std::sync::Arc;

use artisan_core::artifact::LocalArtifactStore;
use artisan_core::scripting::executor::SceneRenderer;
use artisan_db::JobStore;
use artisan_synthesis::ScriptSynthesizer;

pub mod config;
pub mod error;
pub mod lease;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod service;

pub use config::{ConfigError, PipelineConfig, PipelineSettings};
pub use error::ServiceError;
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use registry::CancelRegistry;
pub use runner::{JobRunner, RunOutcome};
pub use service::{GenerationService, JobStatusView};

/// A service and the worker pool that feeds on its submissions.
pub struct Pipeline<S, R> {
    pub service: GenerationService,
    pub pool: WorkerPool<S, R>,
}

impl<S, R> Pipeline<S, R>
where
    S: ScriptSynthesizer + 'static,
    R: SceneRenderer + 'static,
{
    pub fn new(
        store: Arc<dyn JobStore>,
        synthesizer: S,
        renderer: R,
        artifacts: LocalArtifactStore,
        config: PipelineConfig,
    ) -> Self {
        let registry = Arc::new(CancelRegistry::new());
        let queue = JobQueue::new(config.queue_capacity);

        let runner = JobRunner::new(
            Arc::clone(&store),
            Arc::new(synthesizer),
            Arc::new(renderer),
            artifacts.clone(),
            Arc::clone(&registry),
            Arc::new(config),
        );

        Self {
            service: GenerationService::new(store, artifacts, registry, Some(queue.clone())),
            pool: WorkerPool::new(runner, queue),
        }
    }
}
