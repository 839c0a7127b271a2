#![allow(dead_code)]

use std::sync::Arc;

use artisan_api::config::ServerConfig;
use artisan_api::router::build_app_router;
use artisan_api::state::AppState;
use artisan_core::artifact::LocalArtifactStore;
use artisan_core::job::Transition;
use artisan_core::parameters::GenerationRequest;
use artisan_core::types::JobId;
use artisan_db::{JobStore, MemoryJobStore};
use artisan_pipeline::{CancelRegistry, GenerationService};
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        embedded_workers: false,
    }
}

/// An app over an in-memory store with no workers, so tests move jobs
/// through their lifecycle by hand.
pub struct TestApp {
    pub dir: TempDir,
    pub store: Arc<dyn JobStore>,
    pub artifacts: LocalArtifactStore,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let artifacts = LocalArtifactStore::new(dir.path().join("models"));
        artifacts.init().await.unwrap();

        let service = GenerationService::new(
            Arc::clone(&store),
            artifacts.clone(),
            Arc::new(CancelRegistry::new()),
            None,
        );
        let config = test_config();
        let state = AppState {
            service,
            config: Arc::new(config.clone()),
        };

        Self {
            router: build_app_router(state, &config),
            dir,
            store,
            artifacts,
        }
    }

    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Create a job directly in the store.
    pub async fn queued_job(&self, prompt: &str) -> JobId {
        self.store
            .create(GenerationRequest::new(prompt))
            .await
            .unwrap()
            .id
    }

    /// Create a job and move it to `RUNNING` under a lease.
    pub async fn running_job(&self, prompt: &str) -> JobId {
        let id = self.queued_job(prompt).await;
        self.store
            .acquire_lease(id, "worker-test", std::time::Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        self.store.transition(id, Transition::Start).await.unwrap();
        id
    }

    /// Create a job that succeeded with `content` as its artifact.
    pub async fn succeeded_job(&self, prompt: &str, content: &[u8]) -> JobId {
        let id = self.running_job(prompt).await;
        let produced = self.dir.path().join(format!("{id}-out.glb"));
        std::fs::write(&produced, content).unwrap();
        let artifact = self.artifacts.commit(id, &produced).await.unwrap();
        self.store
            .transition(id, Transition::Succeed(artifact))
            .await
            .unwrap();
        id
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
