//! Standalone worker process.
//!
//! Runs a worker pool against the shared Postgres job store without
//! serving HTTP. Jobs submitted through an API process are picked up by
//! the recovery sweep, so any number of workers can share one database.

use std::sync::Arc;

use artisan_core::artifact::LocalArtifactStore;
use artisan_core::scripting::blender::BlenderRenderer;
use artisan_db::{JobStore, PgJobStore};
use artisan_pipeline::config::{process_env, required_var};
use artisan_pipeline::{Pipeline, PipelineSettings};
use artisan_synthesis::OllamaSynthesizer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artisan_worker=debug,artisan_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        required_var(&process_env, "DATABASE_URL").expect("Invalid worker configuration");
    let settings = PipelineSettings::from_env().expect("Invalid pipeline configuration");

    let pool = artisan_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    artisan_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let artifacts = LocalArtifactStore::new(&settings.artifact_dir);
    artifacts
        .init()
        .await
        .expect("Failed to prepare artifact directory");
    tokio::fs::create_dir_all(&settings.pipeline.scratch_dir)
        .await
        .expect("Failed to create scratch directory");

    let renderer = BlenderRenderer::new(settings.renderer.clone());
    if let Err(e) = renderer.check_binary().await {
        tracing::warn!(error = %e, "Renderer unavailable, jobs will fail until it is installed");
    }

    let Pipeline { pool, .. } = Pipeline::new(
        store,
        OllamaSynthesizer::new(settings.synthesis.clone()),
        renderer,
        artifacts,
        settings.pipeline.clone(),
    );

    tracing::info!(
        workers = settings.pipeline.worker_count,
        artifact_dir = %settings.artifact_dir.display(),
        "Worker starting"
    );

    let cancel = CancellationToken::new();
    let run = tokio::spawn(pool.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = run.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }

    tracing::info!("Worker stopped");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, stopping workers"),
        () = terminate => tracing::info!("Received SIGTERM, stopping workers"),
    }
}
