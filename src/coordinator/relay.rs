use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::action::{Action, ExecutionContext, ExecutionResult};
use crate::engine::{ActionExecutor, ExecuteError};
use crate::executor::{ActionDispatch, DispatchOutcome, ExecutionPort};

type PendingKey = (String, usize);

/// Relayed actions still waiting for a result, keyed by `(job id, action index)`.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<PendingKey, oneshot::Sender<ExecutionResult>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slot. A later registration for the same key replaces the earlier one.
    pub fn register(&self, job_id: &str, index: usize) -> oneshot::Receiver<ExecutionResult> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert((job_id.to_string(), index), tx);
        rx
    }

    /// Hands `result` to the waiting relay. `false` when nothing was waiting.
    pub fn resolve(&self, job_id: &str, index: usize, result: ExecutionResult) -> bool {
        let sender = self.lock().remove(&(job_id.to_string(), index));
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, job_id: &str, index: usize) {
        self.lock().remove(&(job_id.to_string(), index));
    }

    /// Drops every slot of a job; their waiters observe cancellation.
    pub fn cancel_job(&self, job_id: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(id, _), _| id != job_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PendingKey, oneshot::Sender<ExecutionResult>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The engine-facing executor of one job: forwards each action to the
/// execution port and waits for its inline or out-of-band result.
pub struct RelayExecutor {
    job_id: String,
    context: ExecutionContext,
    port: Arc<dyn ExecutionPort>,
    pending: Arc<PendingTable>,
}

impl RelayExecutor {
    pub fn new(
        job_id: impl Into<String>,
        context: ExecutionContext,
        port: Arc<dyn ExecutionPort>,
        pending: Arc<PendingTable>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            context,
            port,
            pending,
        }
    }
}

#[async_trait]
impl ActionExecutor for RelayExecutor {
    async fn execute(
        &self,
        index: usize,
        action: &Action,
    ) -> Result<ExecutionResult, ExecuteError> {
        // Registered before dispatch so a fast out-of-band reply is not lost.
        let reply = self.pending.register(&self.job_id, index);
        let request = ActionDispatch {
            job_id: self.job_id.clone(),
            action_index: index,
            action: action.clone(),
            context: self.context.clone(),
        };

        match self.port.dispatch(request).await {
            DispatchOutcome::Completed(result) => {
                self.pending.remove(&self.job_id, index);
                Ok(result)
            }
            DispatchOutcome::Unreachable => {
                self.pending.remove(&self.job_id, index);
                Err(ExecuteError::NoDestination)
            }
            DispatchOutcome::Deferred => {
                debug!(job_id = %self.job_id, index, "awaiting out-of-band result");
                reply.await.map_err(|_| ExecuteError::Cancelled)
            }
        }
    }
}
