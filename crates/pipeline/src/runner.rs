//! Runs one delivered job from lease to terminal state.
//!
//! Stage order is fixed: synthesize, render into a per-job working
//! directory, commit the artifact, then transition. The terminal write is
//! fenced by the lease token, so a worker that lost its lease cannot
//! overwrite the new owner's result.
//!
//! The working directory is removed on every exit path. The lease is
//! released once the job reached a terminal state or was skipped; when the
//! store fails mid-run it is left to expire so the job is redelivered after
//! the lease lifetime rather than immediately.

use std::path::PathBuf;
use std::sync::Arc;

use artisan_core::artifact::{ArtifactError, ArtifactRef, LocalArtifactStore};
use artisan_core::error::{CoreError, ErrorKind};
use artisan_core::job::{Job, JobError, JobStatus, Lease, Transition};
use artisan_core::retry::{retry_with_backoff, RetryError};
use artisan_core::scripting::executor::{SceneRenderer, ScriptError};
use artisan_core::types::JobId;
use artisan_db::{JobStore, StoreError};
use artisan_synthesis::{ScriptSynthesizer, SynthesisError, SynthesizedScript};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::lease::LeaseKeeper;
use crate::registry::CancelRegistry;

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another worker holds the job or it already finished.
    Skipped,
    Succeeded(ArtifactRef),
    Failed(ErrorKind),
    /// The lease was lost mid-run; the new owner finishes the job.
    Abandoned,
}

pub struct JobRunner<S, R> {
    store: Arc<dyn JobStore>,
    synthesizer: Arc<S>,
    renderer: Arc<R>,
    artifacts: LocalArtifactStore,
    registry: Arc<CancelRegistry>,
    config: Arc<PipelineConfig>,
}

impl<S, R> Clone for JobRunner<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            synthesizer: Arc::clone(&self.synthesizer),
            renderer: Arc::clone(&self.renderer),
            artifacts: self.artifacts.clone(),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, R> JobRunner<S, R>
where
    S: ScriptSynthesizer,
    R: SceneRenderer,
{
    pub fn new(
        store: Arc<dyn JobStore>,
        synthesizer: Arc<S>,
        renderer: Arc<R>,
        artifacts: LocalArtifactStore,
        registry: Arc<CancelRegistry>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            synthesizer,
            renderer,
            artifacts,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle one delivery of `job_id` on behalf of worker `owner`.
    pub async fn run(&self, job_id: JobId, owner: &str) -> Result<RunOutcome, StoreError> {
        let granted_at = Instant::now();
        let Some((job, lease)) = self
            .store
            .acquire_lease(job_id, owner, self.config.lease_ttl)
            .await?
        else {
            tracing::debug!(job_id = %job_id, worker = %owner, "Job held elsewhere or finished, skipping");
            return Ok(RunOutcome::Skipped);
        };

        let span = tracing::info_span!("job", job_id = %job_id, worker = %owner, attempt = job.attempts);
        async {
            match self.run_leased(job, &lease, granted_at).await {
                Ok(outcome) => {
                    if let Err(e) = self.store.release_lease(job_id, lease.token).await {
                        tracing::warn!(error = %e, "Failed to release lease");
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Store failed mid-run, leaving lease to expire");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_leased(
        &self,
        job: Job,
        lease: &Lease,
        granted_at: Instant,
    ) -> Result<RunOutcome, StoreError> {
        let job_id = job.id;

        match job.status {
            JobStatus::Queued => match self.store.transition(job_id, Transition::Start).await {
                Ok(_) => tracing::info!("Job started"),
                Err(StoreError::Core(CoreError::InvalidTransition { from, .. })) => {
                    tracing::debug!(status = %from, "Job moved on before start, skipping");
                    return Ok(RunOutcome::Skipped);
                }
                Err(e) => return Err(e),
            },
            JobStatus::Running => tracing::info!("Resuming job after expired lease"),
            JobStatus::Succeeded | JobStatus::Failed => return Ok(RunOutcome::Skipped),
        }

        if job.attempts > self.config.max_deliveries {
            let error = JobError::new(
                ErrorKind::Internal,
                format!("Gave up after {} deliveries", self.config.max_deliveries),
            );
            return self.finish(job_id, lease, Err(error)).await;
        }

        let cancel = CancellationToken::new();
        self.registry.register(job_id, cancel.clone());
        if job.cancel_requested {
            cancel.cancel();
        }
        let keeper = LeaseKeeper::spawn(
            Arc::clone(&self.store),
            job_id,
            lease.token,
            self.config.lease_ttl,
            granted_at,
            cancel.clone(),
        );

        let result = self.execute(&job, &keeper, &cancel).await;

        let lost = keeper.stop().await;
        self.registry.remove(job_id);

        if lost {
            tracing::warn!("Abandoning job after losing its lease");
            return Ok(RunOutcome::Abandoned);
        }

        self.finish(job_id, lease, result).await
    }

    /// Write the terminal state under `lease`.
    async fn finish(
        &self,
        job_id: JobId,
        lease: &Lease,
        result: Result<ArtifactRef, JobError>,
    ) -> Result<RunOutcome, StoreError> {
        let (transition, outcome) = match result {
            Ok(artifact) => (Transition::Succeed(artifact), RunOutcome::Succeeded(artifact)),
            Err(error) => {
                let kind = error.kind;
                (Transition::Fail(error), RunOutcome::Failed(kind))
            }
        };

        match self.store.finish(job_id, lease.token, transition).await {
            Ok(job) => {
                match &job.error {
                    None => tracing::info!(status = %job.status, "Job finished"),
                    Some(error) => {
                        tracing::warn!(status = %job.status, kind = %error.kind, error = %error.message, "Job failed")
                    }
                }
                Ok(outcome)
            }
            Err(StoreError::Core(CoreError::LeaseLost { .. })) => {
                tracing::warn!("Lease lost before the result was written, abandoning");
                Ok(RunOutcome::Abandoned)
            }
            Err(StoreError::Core(CoreError::InvalidTransition { from, .. })) => {
                tracing::warn!(status = %from, "Job finished by another worker");
                Ok(RunOutcome::Abandoned)
            }
            Err(e) => Err(e),
        }
    }

    /// Synthesize, render and commit. The working directory lives for the
    /// duration of this call.
    async fn execute(
        &self,
        job: &Job,
        keeper: &LeaseKeeper,
        cancel: &CancellationToken,
    ) -> Result<ArtifactRef, JobError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let script = self.synthesize(job, cancel).await?;

        let workdir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job.id))
            .tempdir_in(&self.config.scratch_dir)
            .map_err(|e| {
                JobError::new(ErrorKind::Internal, format!("cannot create working directory: {e}"))
            })?;
        let output_path = workdir.path().join(format!("{}.glb", job.id));

        self.render(job.id, &script, output_path.clone(), cancel).await?;

        // The commit is irreversible; check the lease is still ours first.
        if cancel.is_cancelled() || !keeper.confirm().await {
            return Err(cancelled());
        }

        self.artifacts
            .commit(job.id, &output_path)
            .await
            .map_err(artifact_failure)
    }

    async fn synthesize(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<SynthesizedScript, JobError> {
        let synthesizer = &*self.synthesizer;
        let prompt = job.prompt.as_str();
        let parameters = &job.parameters;

        let attempts = retry_with_backoff(
            &self.config.synthesis_retry,
            cancel,
            SynthesisError::is_retryable,
            |attempt| {
                tracing::debug!(attempt, "Synthesizing script");
                synthesizer.synthesize(prompt, parameters)
            },
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RetryError::Cancelled),
            result = attempts => result,
        };
        result.map_err(synthesis_failure)
    }

    async fn render(
        &self,
        job_id: JobId,
        script: &SynthesizedScript,
        output_path: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let renderer = &*self.renderer;
        let script = script.as_str();
        let output_path = output_path.as_path();

        retry_with_backoff(
            &self.config.execution_retry,
            cancel,
            ScriptError::is_retryable,
            |attempt| {
                tracing::info!(attempt, "Executing scene script");
                renderer.render(job_id, script, output_path, cancel)
            },
        )
        .await
        .map(|output| {
            tracing::debug!(duration_ms = output.duration_ms, "Scene script finished");
        })
        .map_err(execution_failure)
    }
}

// ---------------------------------------------------------------------------
// Failure mapping
// ---------------------------------------------------------------------------

fn cancelled() -> JobError {
    JobError::new(ErrorKind::Cancelled, "Job cancelled")
}

fn synthesis_failure(err: RetryError<SynthesisError>) -> JobError {
    match err {
        RetryError::Cancelled => cancelled(),
        RetryError::Permanent(ref e) | RetryError::Exhausted { last: ref e, .. } => {
            JobError::new(e.kind(), err.to_string())
        }
    }
}

fn execution_failure(err: RetryError<ScriptError>) -> JobError {
    let kind = match &err {
        RetryError::Cancelled => return cancelled(),
        RetryError::Permanent(ScriptError::Cancelled) => return cancelled(),
        RetryError::Permanent(ScriptError::Timeout { .. })
        | RetryError::Exhausted {
            last: ScriptError::Timeout { .. },
            ..
        } => ErrorKind::ExecutionTimeout,
        RetryError::Permanent(_) | RetryError::Exhausted { .. } => ErrorKind::ExecutionFailed,
    };
    JobError::new(kind, err.to_string())
}

fn artifact_failure(err: ArtifactError) -> JobError {
    let kind = match err {
        ArtifactError::EmptyArtifact(_) => ErrorKind::EmptyArtifact,
        _ => ErrorKind::Internal,
    };
    JobError::new(kind, err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
