use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use artisan_api::config::ServerConfig;
use artisan_api::router::build_app_router;
use artisan_api::state::AppState;
use artisan_core::artifact::LocalArtifactStore;
use artisan_core::scripting::blender::BlenderRenderer;
use artisan_db::{JobStore, MemoryJobStore, PgJobStore};
use artisan_pipeline::{CancelRegistry, GenerationService, Pipeline, PipelineSettings};
use artisan_synthesis::OllamaSynthesizer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "artisan_api=debug,artisan_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let settings = PipelineSettings::from_env().expect("Invalid pipeline configuration");

    // --- Job store ---
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            let pool = artisan_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            artisan_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            artisan_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    // --- Artifact store and scratch space ---
    let artifacts = LocalArtifactStore::new(&settings.artifact_dir);
    artifacts
        .init()
        .await
        .expect("Failed to prepare artifact directory");
    tokio::fs::create_dir_all(&settings.pipeline.scratch_dir)
        .await
        .expect("Failed to create scratch directory");

    // --- Pipeline ---
    let pool_cancel = CancellationToken::new();
    let (service, pool_handle) = if config.embedded_workers {
        let renderer = BlenderRenderer::new(settings.renderer.clone());
        if let Err(e) = renderer.check_binary().await {
            tracing::warn!(error = %e, "Renderer unavailable, jobs will fail until it is installed");
        }

        let Pipeline { service, pool } = Pipeline::new(
            Arc::clone(&store),
            OllamaSynthesizer::new(settings.synthesis.clone()),
            renderer,
            artifacts,
            settings.pipeline.clone(),
        );
        let handle = tokio::spawn(pool.run(pool_cancel.clone()));
        (service, Some(handle))
    } else {
        if config.database_url.is_none() {
            tracing::warn!("Embedded workers disabled with an in-memory store; jobs will never run");
        }
        let service = GenerationService::new(
            Arc::clone(&store),
            artifacts,
            Arc::new(CancelRegistry::new()),
            None,
        );
        (service, None)
    };

    let state = AppState {
        service,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(config.host.parse().expect("Invalid HOST"), config.port);
    tracing::info!(%addr, embedded_workers = config.embedded_workers, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    pool_cancel.cancel();
    if let Some(handle) = pool_handle {
        let grace = Duration::from_secs(config.shutdown_timeout_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("In-flight jobs still running at shutdown; their leases will expire");
        }
    }

    tracing::info!("Graceful shutdown complete");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
