//! The host-side collaborator that actually applies actions.
//!
//! An [`ExecutionPort`] usually lives in another process or context. It either
//! answers a dispatch directly or acknowledges it and reports the result later
//! through the coordinator's out-of-band delivery path.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ExecutionContext, ExecutionResult};
use crate::error::Result;

pub use http::HttpExecutionPort;

/// One action on its way to the execution port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDispatch {
    pub job_id: String,
    pub action_index: usize,
    pub action: Action,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The port applied the action and answered inline.
    Completed(ExecutionResult),
    /// The port accepted the action; its result arrives out of band.
    Deferred,
    /// No destination was reachable for this dispatch.
    Unreachable,
}

#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn dispatch(&self, request: ActionDispatch) -> DispatchOutcome;

    /// Best-effort notice that a job is stopping.
    async fn notify_stopped(&self, _job_id: &str, _context: &ExecutionContext) -> Result<()> {
        Ok(())
    }
}
