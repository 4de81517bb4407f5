//! In-memory operation history and cancellation handles

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::types::OperationResponse;
use crate::error::{Error, Result};

/// Tracks running operations and remembers the most recent completed ones
pub struct OperationRegistry {
    running: DashMap<String, CancellationToken>,
    history: RwLock<VecDeque<OperationResponse>>,
    limit: usize,
}

impl OperationRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            running: DashMap::new(),
            history: RwLock::new(VecDeque::with_capacity(limit.min(1024))),
            limit,
        }
    }

    /// Register a running operation and hand back its cancellation token
    pub fn begin(&self, operation_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.running.insert(operation_id.to_string(), token.clone());
        debug!("Operation {} registered", operation_id);
        token
    }

    /// Record a finished operation, evicting the oldest past the limit
    pub async fn complete(&self, response: OperationResponse) {
        self.running.remove(&response.operation_id);
        if self.limit == 0 {
            return;
        }
        let mut history = self.history.write().await;
        while history.len() >= self.limit {
            history.pop_front();
        }
        history.push_back(response);
    }

    /// Register `operation_id` for the lifetime of the returned handle
    pub fn track(self: &Arc<Self>, operation_id: &str) -> RunningOperation {
        let cancel = self.begin(operation_id);
        RunningOperation {
            registry: self.clone(),
            operation_id: operation_id.to_string(),
            cancel,
        }
    }

    /// Forget a running operation that produced no history entry
    pub fn abandon(&self, operation_id: &str) {
        if self.running.remove(operation_id).is_some() {
            debug!("Operation {} abandoned", operation_id);
        }
    }

    pub fn cancel(&self, operation_id: &str) -> Result<()> {
        let token = self
            .running
            .get(operation_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("running operation {}", operation_id)))?;
        info!("Cancelling operation {}", operation_id);
        token.cancel();
        Ok(())
    }

    pub fn is_running(&self, operation_id: &str) -> bool {
        self.running.contains_key(operation_id)
    }

    /// Completed operations, newest first
    pub async fn list(&self) -> Vec<OperationResponse> {
        self.history.read().await.iter().rev().cloned().collect()
    }

    pub async fn get(&self, operation_id: &str) -> Result<OperationResponse> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|op| op.operation_id == operation_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("operation {}", operation_id)))
    }
}

/// Running-operation handle; unregisters the operation if dropped before completion
pub struct RunningOperation {
    registry: Arc<OperationRegistry>,
    operation_id: String,
    cancel: CancellationToken,
}

impl RunningOperation {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunningOperation {
    fn drop(&mut self) {
        self.registry.abandon(&self.operation_id);
    }
}
