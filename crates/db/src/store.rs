//! The job store seam shared by every backend.

use std::time::Duration;

use artisan_core::error::{CoreError, ErrorKind};
use artisan_core::job::{Job, Lease, LeaseState, Transition};
use artisan_core::parameters::GenerationRequest;
use artisan_core::types::JobId;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::Database(_) | Self::Migration(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(CoreError::NotFound { .. }))
    }
}

/// Durable job state with compare-and-set transitions and leases.
///
/// Every write is serialized per job: concurrent transitions from the same
/// status produce exactly one winner, losers get
/// [`CoreError::InvalidTransition`] and the stored job is left untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate `request` and store it as a new `QUEUED` job.
    async fn create(&self, request: GenerationRequest) -> Result<Job, StoreError>;

    /// Latest committed snapshot of a job.
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Apply a lifecycle edge if the job is currently in the edge's source
    /// status.
    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, StoreError>;

    /// Apply a lifecycle edge fenced by the lease held under `token`.
    ///
    /// Workers record terminal states through this. If the lease expired
    /// or another worker acquired the job since, the write is rejected
    /// with [`CoreError::LeaseLost`] and the stored job is left untouched.
    async fn finish(
        &self,
        id: JobId,
        token: uuid::Uuid,
        transition: Transition,
    ) -> Result<Job, StoreError>;

    /// Take ownership of a live job that has no unexpired lease.
    ///
    /// `Ok(None)` means someone else holds it or it is already terminal;
    /// callers treat that delivery as a no-op.
    async fn acquire_lease(
        &self,
        id: JobId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<(Job, Lease)>, StoreError>;

    /// Extend the lease held under `token`.
    async fn renew_lease(
        &self,
        id: JobId,
        token: uuid::Uuid,
        ttl: Duration,
    ) -> Result<LeaseState, StoreError>;

    /// Drop the lease if it is still held under `token`.
    async fn release_lease(&self, id: JobId, token: uuid::Uuid) -> Result<(), StoreError>;

    /// Flag a live job for cancellation.
    async fn request_cancel(&self, id: JobId) -> Result<Job, StoreError>;

    /// Ids of jobs a worker should pick up: queued jobs nobody holds and
    /// running jobs whose lease expired. Oldest first.
    async fn recoverable(&self, limit: usize) -> Result<Vec<JobId>, StoreError>;
}

/// The error returned when cancelling a job that already finished.
pub(crate) fn cancel_rejected(job: &Job) -> StoreError {
    CoreError::InvalidTransition {
        id: job.id.to_string(),
        from: job.status,
        to: artisan_core::job::JobStatus::Failed,
    }
    .into()
}
