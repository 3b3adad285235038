//! Job-based replay of recorded UI actions.
//!
//! A [`ReplayEngine`](engine::ReplayEngine) runs one ordered action list with
//! speed scaling, per-action retry, pause/resume/stop and an overall deadline.
//! The [`Coordinator`](coordinator::Coordinator) wraps engines into persisted
//! jobs, relays each action to an [`ExecutionPort`](executor::ExecutionPort)
//! and answers the control protocol.

pub mod action;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod store;

pub use action::{Action, ActionKind, ExecutionContext, ExecutionResult};
pub use config::ReplayConfig;
pub use coordinator::{
    Coordinator, JobSnapshot, JobStatus, Request, Response, StartRequest, StatusReport,
};
pub use error::{ReplayError, Result};
