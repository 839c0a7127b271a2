//! In-process delivery queue of job ids.
//!
//! Delivery is at-least-once: the job store, not the queue, is the source
//! of truth. An id dropped here (queue full, process crash) is found again
//! by the recovery sweep, and a duplicate delivery is harmless because the
//! worker must win the job lease before doing anything.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use artisan_core::types::JobId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Multi-producer, multi-consumer queue of job ids that collapses an id
/// already waiting into a single delivery.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<JobId>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>,
    waiting: Arc<Mutex<HashSet<JobId>>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            waiting: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Offer an id for delivery without blocking.
    ///
    /// Returns `false` when the id is already waiting or the queue is full;
    /// in both cases the job will still be delivered eventually.
    pub fn enqueue(&self, id: JobId) -> bool {
        let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
        if !waiting.insert(id) {
            return false;
        }
        match self.tx.try_send(id) {
            Ok(()) => true,
            Err(e) => {
                waiting.remove(&id);
                tracing::warn!(job_id = %id, error = %e, "Queue rejected job, leaving it to recovery");
                false
            }
        }
    }

    /// Wait for the next id, or `None` once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<JobId> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        let id = tokio::select! {
            _ = cancel.cancelled() => return None,
            id = rx.recv() => match id {
                Some(id) => id,
                None => return None,
            },
        };
        drop(rx);

        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Some(id)
    }

    /// Number of ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
