//! Background renewal of a job lease while the job runs.
//!
//! The keeper renews every third of the lease lifetime. It fires the job's
//! cancellation token when the store reports that cancellation was
//! requested, or when the lease is lost.
//!
//! A lease counts as lost when the store says another token holds it, and
//! also when renewals keep failing until the lease's own expiry passes.
//! The deadline is tracked locally from the instant each successful renewal
//! was *requested*, so it never runs later than the store's expiry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use artisan_core::job::LeaseState;
use artisan_core::types::JobId;
use artisan_db::JobStore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle to a running renewal task.
pub struct LeaseKeeper {
    renewal: Arc<Renewal>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct Renewal {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    token: uuid::Uuid,
    ttl: Duration,
    job_cancel: CancellationToken,
    lost: AtomicBool,
    deadline: Mutex<Instant>,
}

impl Renewal {
    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_lost(&self, reason: &str) {
        tracing::warn!(job_id = %self.job_id, reason, "Job lease lost");
        self.lost.store(true, Ordering::SeqCst);
        self.job_cancel.cancel();
    }

    /// Renew once. Returns `false` once the lease is lost.
    async fn renew(&self) -> bool {
        if self.lost.load(Ordering::SeqCst) {
            return false;
        }

        let requested_at = Instant::now();
        match self.store.renew_lease(self.job_id, self.token, self.ttl).await {
            Ok(LeaseState::Held { cancel_requested }) => {
                *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) =
                    requested_at + self.ttl;
                if cancel_requested && !self.job_cancel.is_cancelled() {
                    tracing::info!(job_id = %self.job_id, "Cancellation requested");
                    self.job_cancel.cancel();
                }
                true
            }
            Ok(LeaseState::Lost) => {
                self.mark_lost("held by another worker");
                false
            }
            Err(e) if Instant::now() >= self.deadline() => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Lease renewal failed");
                self.mark_lost("expired while renewals failed");
                false
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Lease renewal failed");
                true
            }
        }
    }
}

impl LeaseKeeper {
    /// Start renewing the lease held under `token`.
    ///
    /// `granted_at` must not be later than the moment the lease was
    /// requested from the store.
    pub fn spawn(
        store: Arc<dyn JobStore>,
        job_id: JobId,
        token: uuid::Uuid,
        ttl: Duration,
        granted_at: Instant,
        job_cancel: CancellationToken,
    ) -> Self {
        let renewal = Arc::new(Renewal {
            store,
            job_id,
            token,
            ttl,
            job_cancel,
            lost: AtomicBool::new(false),
            deadline: Mutex::new(granted_at + ttl),
        });
        let stop = CancellationToken::new();
        let period = renewal_period(ttl);

        let handle = tokio::spawn({
            let renewal = Arc::clone(&renewal);
            let stop = stop.clone();
            async move {
                loop {
                    // Wake no later than the deadline so a failing store is
                    // noticed as soon as the lease could have been taken.
                    let wake = (Instant::now() + period).min(renewal.deadline());
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                    if !renewal.renew().await {
                        break;
                    }
                }
            }
        });

        Self {
            renewal,
            stop,
            handle,
        }
    }

    /// Renew right now and report whether the lease is still held.
    ///
    /// Called before irreversible steps such as committing the artifact.
    pub async fn confirm(&self) -> bool {
        self.renewal.renew().await
    }

    pub fn is_lost(&self) -> bool {
        self.renewal.lost.load(Ordering::SeqCst)
    }

    /// Stop renewing. Returns `true` if the lease was lost while running.
    pub async fn stop(self) -> bool {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Lease keeper task failed");
        }
        self.renewal.lost.load(Ordering::SeqCst)
    }
}

fn renewal_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(10))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use artisan_core::parameters::GenerationRequest;
    use artisan_db::MemoryJobStore;

    use super::*;

    const TTL: Duration = Duration::from_millis(90);

    async fn leased_job(store: &Arc<dyn JobStore>) -> (JobId, uuid::Uuid, Instant) {
        let job = store
            .create(GenerationRequest::new("a lamp"))
            .await
            .unwrap();
        let granted_at = Instant::now();
        let (_, lease) = store
            .acquire_lease(job.id, "worker-test", TTL)
            .await
            .unwrap()
            .unwrap();
        (job.id, lease.token, granted_at)
    }

    #[test]
    fn renews_three_times_per_ttl() {
        assert_eq!(renewal_period(Duration::from_secs(600)), Duration::from_secs(200));
        assert_eq!(renewal_period(Duration::ZERO), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn keeps_lease_alive_past_ttl() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let (id, token, granted_at) = leased_job(&store).await;
        let cancel = CancellationToken::new();

        let keeper =
            LeaseKeeper::spawn(Arc::clone(&store), id, token, TTL, granted_at, cancel.clone());
        tokio::time::sleep(TTL * 3).await;

        // Still held: nobody else can take it.
        assert!(store.acquire_lease(id, "intruder", TTL).await.unwrap().is_none());
        assert!(keeper.confirm().await);
        assert!(!keeper.stop().await);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_request_fires_token() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let (id, token, granted_at) = leased_job(&store).await;
        let cancel = CancellationToken::new();

        let keeper =
            LeaseKeeper::spawn(Arc::clone(&store), id, token, TTL, granted_at, cancel.clone());
        store.request_cancel(id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), cancel.cancelled())
            .await
            .expect("token fired");
        assert!(!keeper.stop().await);
    }

    #[tokio::test]
    async fn lost_lease_fires_token_and_reports_loss() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let (id, token, granted_at) = leased_job(&store).await;
        let cancel = CancellationToken::new();

        let keeper =
            LeaseKeeper::spawn(Arc::clone(&store), id, token, TTL, granted_at, cancel.clone());
        store.release_lease(id, token).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), cancel.cancelled())
            .await
            .expect("token fired");
        assert!(keeper.stop().await);
    }

    #[tokio::test]
    async fn confirm_detects_takeover_immediately() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let (id, token, granted_at) = leased_job(&store).await;
        let cancel = CancellationToken::new();

        let keeper = LeaseKeeper::spawn(
            Arc::clone(&store),
            id,
            token,
            Duration::from_secs(60),
            granted_at,
            cancel.clone(),
        );
        store.release_lease(id, token).await.unwrap();
        store.acquire_lease(id, "other", TTL).await.unwrap().unwrap();

        assert!(!keeper.confirm().await);
        assert!(keeper.is_lost());
        assert!(cancel.is_cancelled());
        assert!(keeper.stop().await);
    }
}
