//! In-process job store.
//!
//! An arena table keyed by job id behind a single `RwLock`. Every mutation
//! takes the write lock, which is what serializes concurrent transitions.

use std::collections::HashMap;
use std::time::Duration;

use artisan_core::error::CoreError;
use artisan_core::job::{Job, Lease, LeaseState, Transition};
use artisan_core::parameters::GenerationRequest;
use artisan_core::types::JobId;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{cancel_rejected, JobStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, request: GenerationRequest) -> Result<Job, StoreError> {
        let request = request.into_validated()?;
        let job = Job::new(request, Utc::now());
        self.jobs.write().await.insert(job.id, job.clone());
        tracing::debug!(job_id = %job.id, "Job created");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id).into())
    }

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        job.apply(transition, Utc::now())?;
        Ok(job.clone())
    }

    async fn finish(
        &self,
        id: JobId,
        token: uuid::Uuid,
        transition: Transition,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        job.finish(token, transition, Utc::now())?;
        Ok(job.clone())
    }

    async fn acquire_lease(
        &self,
        id: JobId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<(Job, Lease)>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        Ok(job
            .try_acquire_lease(owner, ttl, Utc::now())
            .map(|lease| (job.clone(), lease)))
    }

    async fn renew_lease(
        &self,
        id: JobId,
        token: uuid::Uuid,
        ttl: Duration,
    ) -> Result<LeaseState, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        Ok(job.renew_lease(token, ttl, Utc::now()))
    }

    async fn release_lease(&self, id: JobId, token: uuid::Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        job.release_lease(token);
        Ok(())
    }

    async fn request_cancel(&self, id: JobId) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        if job.status.is_terminal() {
            return Err(cancel_rejected(job));
        }
        job.cancel_requested = true;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn recoverable(&self, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        let mut live: Vec<&Job> = jobs.values().filter(|j| j.is_recoverable_at(now)).collect();
        live.sort_by_key(|j| (j.created_at, j.id));
        Ok(live.into_iter().take(limit).map(|j| j.id).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
