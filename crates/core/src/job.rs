//! The generation job and its forward-only lifecycle.
//!
//! A [`Job`] moves `QUEUED -> RUNNING -> {SUCCEEDED, FAILED}` and never
//! back. Edges are expressed as [`Transition`] values that carry their own
//! payload, so an error can only be attached when failing and an artifact
//! only when succeeding.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::error::{CoreError, ErrorKind};
use crate::parameters::{GenerationParameters, GenerationRequest};
use crate::types::{new_job_id, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(CoreError::Internal(format!("Unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Error detail, lease, transition
// ---------------------------------------------------------------------------

/// Failure detail recorded on a `FAILED` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Time-bounded ownership of a job by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Worker identity, for diagnostics.
    pub owner: String,
    /// Fencing token; only the holder of this token may renew or release.
    pub token: uuid::Uuid,
    pub expires_at: Timestamp,
}

impl Lease {
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// Result of renewing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Still owned; carries the job's cancellation flag.
    Held { cancel_requested: bool },
    /// Expired and taken over, or the job has reached a terminal state.
    Lost,
}

/// A requested lifecycle edge together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    Succeed(ArtifactRef),
    Fail(JobError),
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Start => JobStatus::Running,
            Self::Succeed(_) => JobStatus::Succeeded,
            Self::Fail(_) => JobStatus::Failed,
        }
    }

    /// The only status this edge may leave from.
    pub fn source(&self) -> JobStatus {
        match self {
            Self::Start => JobStatus::Queued,
            Self::Succeed(_) | Self::Fail(_) => JobStatus::Running,
        }
    }
}

/// Longest lease the store will hand out.
pub const MAX_LEASE_DAYS: i64 = 365;

/// `now + ttl`, saturating instead of overflowing for absurd values.
pub fn expiry_after(now: Timestamp, ttl: Duration) -> Timestamp {
    let cap = chrono::Duration::days(MAX_LEASE_DAYS);
    let ttl = chrono::Duration::from_std(ttl).map_or(cap, |d| d.min(cap));
    now.checked_add_signed(ttl).unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub parameters: GenerationParameters,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub artifact_ref: Option<ArtifactRef>,
    /// Number of times a worker has acquired this job.
    pub attempts: u32,
    pub cancel_requested: bool,
    pub lease: Option<Lease>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Build a new `QUEUED` job from an already validated request.
    pub fn new(request: GenerationRequest, now: Timestamp) -> Self {
        Self {
            id: new_job_id(),
            prompt: request.prompt.trim().to_string(),
            parameters: request.parameters,
            status: JobStatus::Queued,
            error: None,
            artifact_ref: None,
            attempts: 0,
            cancel_requested: false,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle edge, rejecting anything outside the graph.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<(), CoreError> {
        let target = transition.target();
        if self.status != transition.source() || !self.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to: target,
            });
        }

        match transition {
            Transition::Start => {}
            Transition::Succeed(artifact) => self.artifact_ref = Some(artifact),
            Transition::Fail(error) => self.error = Some(error),
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Take ownership if the job is live and nobody holds a valid lease.
    pub fn try_acquire_lease(
        &mut self,
        owner: &str,
        ttl: Duration,
        now: Timestamp,
    ) -> Option<Lease> {
        if self.status.is_terminal() {
            return None;
        }
        if self.lease.as_ref().is_some_and(|l| l.is_valid_at(now)) {
            return None;
        }

        let lease = Lease {
            owner: owner.to_string(),
            token: uuid::Uuid::new_v4(),
            expires_at: expiry_after(now, ttl),
        };
        self.lease = Some(lease.clone());
        self.attempts += 1;
        self.updated_at = now;
        Some(lease)
    }

    /// Extend the lease held under `token`.
    pub fn renew_lease(&mut self, token: uuid::Uuid, ttl: Duration, now: Timestamp) -> LeaseState {
        match &mut self.lease {
            Some(lease) if lease.token == token && !self.status.is_terminal() => {
                lease.expires_at = expiry_after(now, ttl);
                LeaseState::Held {
                    cancel_requested: self.cancel_requested,
                }
            }
            _ => LeaseState::Lost,
        }
    }

    /// Drop the lease if it is still held under `token`.
    pub fn release_lease(&mut self, token: uuid::Uuid) -> bool {
        if self.lease.as_ref().is_some_and(|l| l.token == token) {
            self.lease = None;
            true
        } else {
            false
        }
    }

    /// Apply `transition` on behalf of the worker holding `token`.
    ///
    /// Fails with [`CoreError::LeaseLost`] unless that lease is still the
    /// current one and unexpired at `now`, so a worker that was replaced
    /// cannot overwrite the new owner's result.
    pub fn finish(
        &mut self,
        token: uuid::Uuid,
        transition: Transition,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let held = self
            .lease
            .as_ref()
            .is_some_and(|l| l.token == token && l.is_valid_at(now));
        if !held {
            return Err(CoreError::LeaseLost {
                id: self.id.to_string(),
            });
        }
        self.apply(transition, now)
    }

    /// Whether a recovery sweep should hand this job to a worker.
    pub fn is_recoverable_at(&self, now: Timestamp) -> bool {
        let leased = self.lease.as_ref().is_some_and(|l| l.is_valid_at(now));
        match self.status {
            JobStatus::Queued | JobStatus::Running => !leased,
            JobStatus::Succeeded | JobStatus::Failed => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
