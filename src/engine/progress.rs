use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::Action;

/// Lifecycle of a single replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Idle,
    Running,
    Paused,
    Complete,
    Error,
    Stopped,
}

impl ReplayStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReplayStatus::Complete | ReplayStatus::Error | ReplayStatus::Stopped
        )
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplayStatus::Idle => "idle",
            ReplayStatus::Running => "running",
            ReplayStatus::Paused => "paused",
            ReplayStatus::Complete => "complete",
            ReplayStatus::Error => "error",
            ReplayStatus::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// An action that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionError {
    pub action_index: usize,
    pub action: Action,
    pub message: String,
    pub attempts: u32,
}

/// Point-in-time view of a run, handed to listeners and `get_progress` callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayProgress {
    pub current_index: usize,
    pub total: usize,
    pub status: ReplayStatus,
    pub completed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub errors: Vec<ActionError>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Every action was processed, successfully or not.
    Finished,
    /// The run deadline fired before the last action was processed.
    TimedOut,
    /// A stop request ended the run.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub success: bool,
    pub outcome: ReplayOutcome,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<ActionError>,
    pub duration_ms: u64,
}

/// Counters a resumed run starts from instead of zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayCheckpoint {
    /// First action index still to execute.
    pub next_index: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<ActionError>,
    /// Active time already spent on the job before this run.
    pub prior_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ReplayProgress) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Listener> {
        self.entries.iter().map(|(_, l)| l.clone()).collect()
    }
}

/// Calls every listener; a panicking listener is logged and skipped.
pub(crate) fn notify_all(listeners: &[Listener], progress: &ReplayProgress) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(progress))).is_err() {
            warn!(
                status = %progress.status,
                current_index = progress.current_index,
                "progress listener panicked"
            );
        }
    }
}
