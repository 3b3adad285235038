use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, ExecutionContext};
use crate::engine::{
    ActionError, ReplayCheckpoint, ReplayOptions, ReplayProgress, ReplayResult, ReplayStatus,
};
use crate::error::{ReplayError, Result};

/// Tracks the lifecycle status of a job.
///
/// running → {paused ⇄ running} → {complete | error | stopped}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Paused,
    Complete,
    Error,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error | JobStatus::Stopped)
    }

    /// Whether `self → next` is a legal edge of the job state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Running, JobStatus::Paused) | (JobStatus::Paused, JobStatus::Running) => {
                true
            }
            (JobStatus::Running | JobStatus::Paused, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// The job status matching a live engine status; `None` before the run starts.
    pub fn from_replay(status: ReplayStatus) -> Option<JobStatus> {
        match status {
            ReplayStatus::Idle => None,
            ReplayStatus::Running => Some(JobStatus::Running),
            ReplayStatus::Paused => Some(JobStatus::Paused),
            ReplayStatus::Complete => Some(JobStatus::Complete),
            ReplayStatus::Error => Some(JobStatus::Error),
            ReplayStatus::Stopped => Some(JobStatus::Stopped),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub current_index: usize,
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}

impl JobProgress {
    pub fn processed(&self) -> usize {
        self.completed_count + self.failed_count
    }
}

/// A replay request with its full persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub actions: Vec<Action>,
    pub options: ReplayOptions,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub errors: Vec<ActionError>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Job {
    pub fn new(
        id: String,
        actions: Vec<Action>,
        options: ReplayOptions,
        execution_context: ExecutionContext,
    ) -> Self {
        let total = actions.len();
        Self {
            id,
            actions,
            options,
            status: JobStatus::Running,
            progress: JobProgress {
                total,
                ..JobProgress::default()
            },
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            execution_context,
            duration_ms: 0,
        }
    }

    /// Moves the job along the state machine. Terminal states stamp `end_time`.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ReplayError::AlreadyFinished(self.id.clone()));
        }
        if !self.status.can_transition_to(next) {
            return Err(match next {
                JobStatus::Paused => ReplayError::NotRunning(self.id.clone()),
                JobStatus::Running => ReplayError::NotPaused(self.id.clone()),
                _ => ReplayError::Validation(format!(
                    "illegal transition {} -> {next} for {}",
                    self.status, self.id
                )),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Mirrors a live engine snapshot into the record.
    pub fn apply_progress(&mut self, progress: &ReplayProgress) {
        self.progress.current_index = progress.current_index;
        self.progress.total = progress.total;
        self.progress.completed_count = progress.completed;
        self.progress.failed_count = progress.failed;
        self.errors = progress.errors.clone();
        self.duration_ms = progress.duration_ms;
    }

    pub fn apply_result(&mut self, result: &ReplayResult) {
        self.progress.completed_count = result.completed;
        self.progress.failed_count = result.failed;
        self.errors = result.errors.clone();
        self.duration_ms = result.duration_ms;
    }

    /// Where a fresh engine picks up this job.
    pub fn checkpoint(&self) -> ReplayCheckpoint {
        ReplayCheckpoint {
            next_index: self.progress.processed().min(self.actions.len()),
            completed: self.progress.completed_count,
            failed: self.progress.failed_count,
            errors: self.errors.clone(),
            prior_duration_ms: self.duration_ms,
        }
    }

    /// Terminal and ended longer than `retention` before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.status.is_terminal()
            && self
                .end_time
                .is_some_and(|ended| now.signed_duration_since(ended) > retention)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: SnapshotProgress {
                current: self.progress.current_index,
                total: self.progress.total,
                completed: self.progress.completed_count,
                failed: self.progress.failed_count,
            },
            start_time: self.start_time,
            end_time: self.end_time,
            error_count: self.errors.len(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProgress {
    pub current: usize,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// What callers see of a job: no action payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub progress: SnapshotProgress,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_count: usize,
    pub duration_ms: u64,
}
