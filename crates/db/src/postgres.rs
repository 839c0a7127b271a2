//! PostgreSQL job store over the `generation_jobs` table.
//!
//! Transitions are a single conditional `UPDATE ... WHERE status = $expected`
//! and lease acquisition is a single conditional `UPDATE`, so the database
//! row lock serializes competing workers across processes. All lease clocks
//! use the database's `NOW()`.

use std::time::Duration;

use artisan_core::artifact::ArtifactRef;
use artisan_core::error::{CoreError, ErrorKind};
use artisan_core::job::{Job, JobError, JobStatus, Lease, LeaseState, Transition, MAX_LEASE_DAYS};
use artisan_core::parameters::{GenerationParameters, GenerationRequest};
use artisan_core::types::{JobId, Timestamp};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::store::{cancel_rejected, JobStore, StoreError};

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, prompt, parameters, status, error_kind, error_message, artifact_ref, \
    attempts, cancel_requested, lease_owner, lease_token, lease_expires_at, \
    created_at, updated_at";

/// Statuses a worker may still act on.
const LIVE_STATUSES: &str = "('QUEUED', 'RUNNING')";

/// A row from the `generation_jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: JobId,
    prompt: String,
    parameters: Json<GenerationParameters>,
    status: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    artifact_ref: Option<String>,
    attempts: i32,
    cancel_requested: bool,
    lease_owner: Option<String>,
    lease_token: Option<uuid::Uuid>,
    lease_expires_at: Option<Timestamp>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse()?;
        let error = match row.error_kind {
            Some(kind) => Some(JobError::new(
                kind.parse::<ErrorKind>()?,
                row.error_message.unwrap_or_default(),
            )),
            None => None,
        };
        let artifact_ref = row
            .artifact_ref
            .map(|r| r.parse::<ArtifactRef>())
            .transpose()
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let lease = match (row.lease_token, row.lease_expires_at) {
            (Some(token), Some(expires_at)) => Some(Lease {
                owner: row.lease_owner.unwrap_or_default(),
                token,
                expires_at,
            }),
            _ => None,
        };

        Ok(Job {
            id: row.id,
            prompt: row.prompt,
            parameters: row.parameters.0,
            status,
            error,
            artifact_ref,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            cancel_requested: row.cancel_requested,
            lease,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Lease length in seconds as bound into `make_interval`.
fn ttl_secs(ttl: Duration) -> f64 {
    ttl.as_secs_f64().min((MAX_LEASE_DAYS * 86_400) as f64)
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::try_from).transpose()?)
    }

    async fn require(&self, id: JobId) -> Result<Job, StoreError> {
        self.find(id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(id).into())
    }

    /// Compare-and-set on the status, optionally fenced by a live lease.
    async fn apply(
        &self,
        id: JobId,
        transition: Transition,
        fence: Option<uuid::Uuid>,
    ) -> Result<Job, StoreError> {
        let from = transition.source();
        let to = transition.target();
        let (artifact_ref, error_kind, error_message) = match &transition {
            Transition::Start => (None, None, None),
            Transition::Succeed(artifact) => (Some(artifact.to_string()), None, None),
            Transition::Fail(error) => (None, Some(error.kind.as_str()), Some(error.message.clone())),
        };

        let query = format!(
            "UPDATE generation_jobs \
             SET status = $2, \
                 artifact_ref = COALESCE($3, artifact_ref), \
                 error_kind = COALESCE($4, error_kind), \
                 error_message = COALESCE($5, error_message), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $6 \
               AND ($7::uuid IS NULL OR (lease_token = $7 AND lease_expires_at > NOW())) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(to.as_str())
            .bind(artifact_ref)
            .bind(error_kind)
            .bind(error_message)
            .bind(from.as_str())
            .bind(fence)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(Job::try_from(row)?);
        }

        let current = self.require(id).await?;
        if current.status != from {
            return Err(CoreError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            }
            .into());
        }
        Err(CoreError::LeaseLost { id: id.to_string() }.into())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, request: GenerationRequest) -> Result<Job, StoreError> {
        let request = request.into_validated()?;
        let job = Job::new(request, chrono::Utc::now());

        let query = format!(
            "INSERT INTO generation_jobs (id, prompt, parameters, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(&job.prompt)
            .bind(Json(&job.parameters))
            .bind(job.status.as_str())
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await?;

        tracing::debug!(job_id = %job.id, "Job created");
        Ok(Job::try_from(row)?)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.require(id).await
    }

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        self.apply(id, transition, None).await
    }

    async fn finish(
        &self,
        id: JobId,
        token: uuid::Uuid,
        transition: Transition,
    ) -> Result<Job, StoreError> {
        self.apply(id, transition, Some(token)).await
    }

    async fn acquire_lease(
        &self,
        id: JobId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<(Job, Lease)>, StoreError> {
        let query = format!(
            "UPDATE generation_jobs \
             SET lease_owner = $2, lease_token = $3, \
                 lease_expires_at = NOW() + make_interval(secs => $4), \
                 attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND status IN {LIVE_STATUSES} \
               AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(owner)
            .bind(uuid::Uuid::new_v4())
            .bind(ttl_secs(ttl))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                let lease = job
                    .lease
                    .clone()
                    .ok_or_else(|| CoreError::Internal(format!("Lease missing on job {id}")))?;
                Ok(Some((job, lease)))
            }
            None => {
                // Distinguish "held or terminal" from "unknown id".
                self.require(id).await?;
                Ok(None)
            }
        }
    }

    async fn renew_lease(
        &self,
        id: JobId,
        token: uuid::Uuid,
        ttl: Duration,
    ) -> Result<LeaseState, StoreError> {
        let query = format!(
            "UPDATE generation_jobs \
             SET lease_expires_at = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND lease_token = $2 AND status IN {LIVE_STATUSES} \
             RETURNING cancel_requested"
        );
        let cancel_requested: Option<bool> = sqlx::query_scalar(&query)
            .bind(id)
            .bind(token)
            .bind(ttl_secs(ttl))
            .fetch_optional(&self.pool)
            .await?;

        Ok(match cancel_requested {
            Some(cancel_requested) => LeaseState::Held { cancel_requested },
            None => LeaseState::Lost,
        })
    }

    async fn release_lease(&self, id: JobId, token: uuid::Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE generation_jobs \
             SET lease_owner = NULL, lease_token = NULL, lease_expires_at = NULL \
             WHERE id = $1 AND lease_token = $2",
        )
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn request_cancel(&self, id: JobId) -> Result<Job, StoreError> {
        let query = format!(
            "UPDATE generation_jobs \
             SET cancel_requested = TRUE, updated_at = NOW() \
             WHERE id = $1 AND status IN {LIVE_STATUSES} \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Job::try_from(row)?),
            None => Err(cancel_rejected(&self.require(id).await?)),
        }
    }

    async fn recoverable(&self, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let query = format!(
            "SELECT id FROM generation_jobs \
             WHERE status IN {LIVE_STATUSES} \
               AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $1"
        );
        let ids = sqlx::query_scalar::<_, JobId>(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}
