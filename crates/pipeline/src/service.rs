//! The submission, status and download boundary.
//!
//! [`GenerationService`] never runs pipeline stages itself: it writes to
//! the job store, nudges the local queue and reads back committed state.

use std::sync::Arc;

use artisan_core::artifact::{ArtifactRef, LocalArtifactStore};
use artisan_core::error::CoreError;
use artisan_core::job::{Job, JobError, JobStatus};
use artisan_core::parameters::GenerationRequest;
use artisan_core::types::{JobId, Timestamp};
use artisan_db::JobStore;
use serde::Serialize;

use crate::error::ServiceError;
use crate::queue::JobQueue;
use crate::registry::CancelRegistry;

/// What clients see of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub attempts: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            artifact_ref: job.artifact_ref,
            error: job.error,
            attempts: job.attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn JobStore>,
    artifacts: LocalArtifactStore,
    registry: Arc<CancelRegistry>,
    /// `None` when no worker pool runs in this process; jobs are then
    /// picked up by a standalone worker's recovery sweep.
    queue: Option<JobQueue>,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: LocalArtifactStore,
        registry: Arc<CancelRegistry>,
        queue: Option<JobQueue>,
    ) -> Self {
        Self {
            store,
            artifacts,
            registry,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a `QUEUED` job and offer it to the local workers.
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobId, ServiceError> {
        let job = self.store.create(request).await?;
        tracing::info!(job_id = %job.id, "Job submitted");

        if let Some(queue) = &self.queue {
            queue.enqueue(job.id);
        }
        Ok(job.id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobStatusView, ServiceError> {
        Ok(self.store.get(id).await?.into())
    }

    /// Open the committed artifact of a `SUCCEEDED` job.
    pub async fn open_artifact(&self, id: JobId) -> Result<(tokio::fs::File, u64), ServiceError> {
        let job = self.store.get(id).await?;
        let artifact = match (job.status, job.artifact_ref) {
            (JobStatus::Succeeded, Some(artifact)) => artifact,
            _ => {
                return Err(CoreError::NotFound {
                    entity: "Artifact",
                    id: id.to_string(),
                }
                .into())
            }
        };
        Ok(self.artifacts.open(&artifact).await?)
    }

    /// Request cancellation. Running jobs end `FAILED` with kind
    /// `Cancelled`; terminal jobs are rejected with `InvalidTransition`.
    pub async fn cancel(&self, id: JobId) -> Result<JobStatusView, ServiceError> {
        let job = self.store.request_cancel(id).await?;
        let local = self.registry.cancel(id);
        tracing::info!(job_id = %id, local, "Job cancellation requested");
        Ok(job.into())
    }
}
