//! Cancellation tokens of the jobs running in this process.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use artisan_core::types::JobId;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: JobId, token: CancellationToken) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token);
    }

    pub fn remove(&self, id: JobId) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Fire the token of a locally running job. Returns `false` if the job
    /// is not running here.
    pub fn cancel(&self, id: JobId) -> bool {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: JobId) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}
