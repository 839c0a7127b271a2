//! Fixed-size worker pool with a periodic recovery sweep.
//!
//! Workers compete on the [`JobQueue`]; the sweep re-offers jobs the store
//! reports as recoverable (never delivered, or owned by a worker whose
//! lease expired). A standalone worker process relies on the sweep alone.

use artisan_core::scripting::executor::SceneRenderer;
use artisan_synthesis::ScriptSynthesizer;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;
use crate::runner::{JobRunner, RunOutcome};

pub struct WorkerPool<S, R> {
    runner: JobRunner<S, R>,
    queue: JobQueue,
}

impl<S, R> WorkerPool<S, R>
where
    S: ScriptSynthesizer + 'static,
    R: SceneRenderer + 'static,
{
    pub fn new(runner: JobRunner<S, R>, queue: JobQueue) -> Self {
        Self { runner, queue }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Run the workers and the recovery sweep until `cancel` fires, then
    /// wait for in-flight jobs to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let worker_count = self.runner.config().worker_count.max(1);
        tracing::info!(
            worker_count,
            recovery_interval_ms = self.runner.config().recovery_interval.as_millis() as u64,
            "Worker pool started",
        );

        let mut workers = JoinSet::new();
        for slot in 0..worker_count {
            let owner = worker_owner(slot);
            let runner = self.runner.clone();
            let queue = self.queue.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { work(runner, queue, owner, cancel).await });
        }

        self.recover_until(&cancel).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    async fn recover_until(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.runner.config().recovery_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker pool shutting down");
                    break;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    /// One recovery pass: offer every recoverable job to the queue.
    async fn sweep(&self) {
        let batch = self.runner.config().recovery_batch;
        match self.runner.store().recoverable(batch).await {
            Ok(ids) => {
                let offered = ids.into_iter().filter(|id| self.queue.enqueue(*id)).count();
                if offered > 0 {
                    tracing::info!(offered, "Recovered jobs for delivery");
                }
            }
            Err(e) => tracing::error!(error = %e, "Recovery sweep failed"),
        }
    }
}

/// Lease owner name of one worker slot in this process.
pub fn worker_owner(slot: usize) -> String {
    format!("worker-{}-{slot}", std::process::id())
}

async fn work<S, R>(runner: JobRunner<S, R>, queue: JobQueue, owner: String, cancel: CancellationToken)
where
    S: ScriptSynthesizer,
    R: SceneRenderer,
{
    tracing::debug!(worker = %owner, "Worker started");
    while let Some(job_id) = queue.dequeue(&cancel).await {
        match runner.run(job_id, &owner).await {
            Ok(RunOutcome::Skipped) => {}
            Ok(outcome) => tracing::debug!(job_id = %job_id, worker = %owner, ?outcome, "Delivery handled"),
            Err(e) => {
                // The job stays leased until expiry and is then recovered.
                tracing::error!(job_id = %job_id, worker = %owner, error = %e, "Job store error while running job");
            }
        }
    }
    tracing::debug!(worker = %owner, "Worker stopped");
}
