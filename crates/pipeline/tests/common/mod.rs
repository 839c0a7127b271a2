//! Fixtures for driving the pipeline end to end without Ollama or Blender.
//!
//! The synthesizer is replaced by [`StubSynthesizer`], whose "model text"
//! goes through the real response validation. The renderer is the real
//! [`BlenderRenderer`] pointed at a shell script that runs the synthesized
//! script with `sh`, so scripts in these tests are shell, not Python.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use artisan_core::artifact::LocalArtifactStore;
use artisan_core::error::CoreError;
use artisan_core::job::{Job, Lease, LeaseState, Transition};
use artisan_core::parameters::{GenerationParameters, GenerationRequest};
use artisan_core::retry::RetryPolicy;
use artisan_core::scripting::blender::{BlenderRenderer, RendererConfig};
use artisan_core::types::JobId;
use artisan_db::{JobStore, MemoryJobStore, StoreError};
use artisan_pipeline::{
    CancelRegistry, GenerationService, JobRunner, JobStatusView, Pipeline, PipelineConfig,
};
use artisan_synthesis::response::parse_model_output;
use artisan_synthesis::{ScriptSynthesizer, SynthesisError, SynthesizedScript};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Synthesizer stub
// ---------------------------------------------------------------------------

/// What the stub answers on every call.
#[derive(Clone)]
pub enum StubReply {
    /// Raw model text, validated like a real reply.
    ModelText(String),
    /// The service is down.
    Unavailable,
}

#[derive(Clone)]
pub struct StubSynthesizer {
    reply: StubReply,
    calls: Arc<AtomicUsize>,
}

impl StubSynthesizer {
    pub fn new(reply: StubReply) -> Self {
        Self {
            reply,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer with a well-formed reply carrying `script`.
    pub fn with_script(script: &str) -> Self {
        Self::new(StubReply::ModelText(
            serde_json::json!({ "python_script": script }).to_string(),
        ))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScriptSynthesizer for StubSynthesizer {
    async fn synthesize(
        &self,
        _prompt: &str,
        _parameters: &GenerationParameters,
    ) -> Result<SynthesizedScript, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            StubReply::ModelText(text) => parse_model_output(text),
            StubReply::Unavailable => Err(SynthesisError::Unavailable("connection refused".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Store with injected faults
// ---------------------------------------------------------------------------

/// An in-memory store whose writes can be made to fail like a database
/// that dropped its connection.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryJobStore,
    renewals_fail: AtomicBool,
    success_writes_fail: AtomicBool,
}

impl FaultyStore {
    /// Every lease renewal errors.
    pub fn failing_renewals() -> Self {
        let store = Self::default();
        store.renewals_fail.store(true, Ordering::SeqCst);
        store
    }

    /// Recording `SUCCEEDED` errors; failures are still recorded.
    pub fn failing_success_writes() -> Self {
        let store = Self::default();
        store.success_writes_fail.store(true, Ordering::SeqCst);
        store
    }

    fn outage() -> StoreError {
        CoreError::Internal("connection reset by peer".into()).into()
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    async fn create(&self, request: GenerationRequest) -> Result<Job, StoreError> {
        self.inner.create(request).await
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner.get(id).await
    }

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        self.inner.transition(id, transition).await
    }

    async fn finish(
        &self,
        id: JobId,
        token: uuid::Uuid,
        transition: Transition,
    ) -> Result<Job, StoreError> {
        if matches!(transition, Transition::Succeed(_))
            && self.success_writes_fail.load(Ordering::SeqCst)
        {
            return Err(Self::outage());
        }
        self.inner.finish(id, token, transition).await
    }

    async fn acquire_lease(
        &self,
        id: JobId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<(Job, Lease)>, StoreError> {
        self.inner.acquire_lease(id, owner, ttl).await
    }

    async fn renew_lease(
        &self,
        id: JobId,
        token: uuid::Uuid,
        ttl: Duration,
    ) -> Result<LeaseState, StoreError> {
        if self.renewals_fail.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.renew_lease(id, token, ttl).await
    }

    async fn release_lease(&self, id: JobId, token: uuid::Uuid) -> Result<(), StoreError> {
        self.inner.release_lease(id, token).await
    }

    async fn request_cancel(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner.request_cancel(id).await
    }

    async fn recoverable(&self, limit: usize) -> Result<Vec<JobId>, StoreError> {
        self.inner.recoverable(limit).await
    }
}

// ---------------------------------------------------------------------------
// Scripts understood by the fake renderer
// ---------------------------------------------------------------------------

/// Writes a 1200-byte model.
pub const RED_CUBE_SCRIPT: &str = "head -c 1200 /dev/zero > 'EXPORT_PATH'";

/// Exits cleanly after producing an empty file.
pub const EMPTY_OUTPUT_SCRIPT: &str = ": > 'EXPORT_PATH'";

/// Records each execution in `counter`, then hangs.
pub fn hanging_script(counter: &Path) -> String {
    format!(
        "echo run >> '{}'\nsleep 30\nhead -c 10 /dev/zero > 'EXPORT_PATH'",
        counter.display()
    )
}

/// Signals that it started by creating `marker`, then hangs.
pub fn marker_script(marker: &Path) -> String {
    format!(
        "touch '{}'\nsleep 30\nhead -c 10 /dev/zero > 'EXPORT_PATH'",
        marker.display()
    )
}

/// Logs `start` to `log`, runs for two seconds, logs `end` and writes a
/// 10-byte model.
pub fn slow_script(log: &Path) -> String {
    format!(
        "echo start >> '{log}'\nsleep 2\necho end >> '{log}'\nhead -c 10 /dev/zero > 'EXPORT_PATH'",
        log = log.display()
    )
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub scratch: PathBuf,
    pub models: PathBuf,
    pub store: Arc<dyn JobStore>,
    pub artifacts: LocalArtifactStore,
    pub config: PipelineConfig,
    pub renderer_config: RendererConfig,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let models = dir.path().join("models");
        std::fs::create_dir_all(&scratch).unwrap();

        let artifacts = LocalArtifactStore::new(&models);
        artifacts.init().await.unwrap();

        let fast_retry = RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        };
        let config = PipelineConfig {
            worker_count: 2,
            lease_ttl: Duration::from_secs(3),
            recovery_interval: Duration::from_millis(50),
            synthesis_retry: RetryPolicy {
                max_attempts: 3,
                ..fast_retry.clone()
            },
            execution_retry: RetryPolicy {
                max_attempts: 2,
                ..fast_retry
            },
            scratch_dir: scratch.clone(),
            ..PipelineConfig::default()
        };
        let renderer_config = RendererConfig {
            binary: fake_renderer(dir.path()),
            scratch_dir: scratch.clone(),
            timeout: Duration::from_secs(10),
        };

        Self {
            dir,
            scratch,
            models,
            store: Arc::new(MemoryJobStore::new()),
            artifacts,
            config,
            renderer_config,
        }
    }

    pub fn renderer(&self) -> BlenderRenderer {
        BlenderRenderer::new(self.renderer_config.clone())
    }

    /// Start a worker pool; returns the service and the token stopping it.
    pub fn start(&self, synthesizer: StubSynthesizer) -> (GenerationService, CancellationToken) {
        let Pipeline { service, pool } = Pipeline::new(
            Arc::clone(&self.store),
            synthesizer,
            self.renderer(),
            self.artifacts.clone(),
            self.config.clone(),
        );
        let cancel = CancellationToken::new();
        tokio::spawn(pool.run(cancel.clone()));
        (service, cancel)
    }

    /// A runner for driving single deliveries by hand.
    pub fn runner(&self, synthesizer: StubSynthesizer) -> JobRunner<StubSynthesizer, BlenderRenderer> {
        JobRunner::new(
            Arc::clone(&self.store),
            Arc::new(synthesizer),
            Arc::new(self.renderer()),
            self.artifacts.clone(),
            Arc::new(CancelRegistry::new()),
            Arc::new(self.config.clone()),
        )
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}

pub fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt)
}

/// Poll until the job is terminal.
pub async fn wait_terminal(service: &GenerationService, id: JobId) -> JobStatusView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let view = service.status(id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {}",
            view.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the job's lease is released; release follows the terminal
/// transition.
pub async fn wait_lease_released(store: &Arc<dyn JobStore>, id: JobId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.get(id).await.unwrap().lease.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "lease of {id} never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `path` exists.
pub async fn wait_for_file(path: &Path) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(tokio::time::Instant::now() < deadline, "{} never appeared", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// An executable stand-in for Blender that runs its last argument with `sh`.
pub fn fake_renderer(dir: &Path) -> PathBuf {
    let path = dir.join("fake-blender");
    std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\nexec sh \"$last\"\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
