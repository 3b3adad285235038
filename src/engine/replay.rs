use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::control::RunControl;
use super::options::{ReplayLimits, ReplayOptions, RetryPolicy, scaled_delay_ms};
use super::progress::{
    ActionError, ListenerId, Listeners, ReplayCheckpoint, ReplayOutcome, ReplayProgress,
    ReplayResult, ReplayStatus, notify_all,
};
use crate::action::{Action, ExecutionResult};
use crate::error::{ReplayError, Result};

pub const NO_ACTIVE_DESTINATION: &str = "no active destination";

/// Failures that bypass the retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    /// Nothing is there to receive the action; retrying cannot help.
    #[error("no active destination")]
    NoDestination,

    /// The pending execution was abandoned by its owner.
    #[error("execution cancelled")]
    Cancelled,
}

/// Applies one action. Supplied per run; the engine never looks inside actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        index: usize,
        action: &Action,
    ) -> std::result::Result<ExecutionResult, ExecuteError>;
}

enum Step {
    Completed,
    Failed(ActionError),
    Cancelled,
}

#[derive(Debug)]
struct RunProgress {
    status: ReplayStatus,
    /// Set once `replay` has been entered; control calls made before that are pending.
    started: bool,
    current_index: usize,
    total: usize,
    completed: usize,
    failed: usize,
    errors: Vec<ActionError>,
}

/// Executes one ordered action list against an [`ActionExecutor`].
///
/// One engine drives exactly one run. Control calls (`pause`, `resume`, `stop`,
/// `get_progress`) may be made from other tasks while `replay` is in flight.
pub struct ReplayEngine {
    executor: Arc<dyn ActionExecutor>,
    limits: ReplayLimits,
    retry: RetryPolicy,
    checkpoint: Option<ReplayCheckpoint>,
    control: RunControl,
    progress: Mutex<RunProgress>,
    listeners: Mutex<Listeners>,
}

impl ReplayEngine {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            limits: ReplayLimits::default(),
            retry: RetryPolicy::default(),
            checkpoint: None,
            control: RunControl::new(),
            progress: Mutex::new(RunProgress {
                status: ReplayStatus::Idle,
                started: false,
                current_index: 0,
                total: 0,
                completed: 0,
                failed: 0,
                errors: Vec::new(),
            }),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    pub fn with_limits(mut self, limits: ReplayLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Continue a previous run: skip to `next_index` and keep its counters.
    pub fn with_checkpoint(mut self, checkpoint: ReplayCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Registers a callback fired after every action, pause, resume and on completion.
    pub fn on_progress<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ReplayProgress) + Send + Sync + 'static,
    {
        lock(&self.listeners).add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(id)
    }

    /// Runs the actions in order and reports how the run ended.
    ///
    /// Options are validated before anything executes. Every other outcome,
    /// timeouts and stops included, is reported through the returned result.
    pub async fn replay(&self, actions: &[Action], options: ReplayOptions) -> Result<ReplayResult> {
        self.limits.validate(actions.len(), &options)?;
        let start_index = self.checkpoint.as_ref().map_or(0, |c| c.next_index);
        if start_index > actions.len() {
            return Err(ReplayError::Validation(format!(
                "checkpoint index {start_index} beyond {} actions",
                actions.len()
            )));
        }

        let stopped_early = {
            let mut progress = lock(&self.progress);
            if progress.started {
                return Err(ReplayError::Validation(format!(
                    "replay already started (status {})",
                    progress.status
                )));
            }
            progress.started = true;
            let stopped_early = progress.status == ReplayStatus::Stopped;
            progress.total = actions.len();
            if let Some(checkpoint) = &self.checkpoint {
                progress.current_index = checkpoint.next_index.saturating_sub(1);
                progress.completed = checkpoint.completed;
                progress.failed = checkpoint.failed;
                progress.errors = checkpoint.errors.clone();
            }
            if progress.status == ReplayStatus::Idle {
                progress.status = ReplayStatus::Running;
            }
            stopped_early
        };

        self.control.begin();
        info!(
            total = actions.len(),
            start_index,
            speed = options.speed,
            retry_count = options.retry_count,
            timeout_ms = options.timeout_ms,
            "replay started"
        );

        let outcome = if stopped_early {
            ReplayOutcome::Cancelled
        } else {
            let deadline = Duration::from_millis(options.timeout_ms);
            tokio::select! {
                outcome = self.run_actions(actions, start_index, &options) => outcome,
                _ = tokio::time::sleep(deadline) => {
                    warn!(timeout_ms = options.timeout_ms, "replay timed out");
                    ReplayOutcome::TimedOut
                }
            }
        };
        self.control.finish();

        let result = {
            let mut progress = lock(&self.progress);
            progress.status = match outcome {
                ReplayOutcome::Finished if progress.failed == 0 => ReplayStatus::Complete,
                ReplayOutcome::Finished | ReplayOutcome::TimedOut => ReplayStatus::Error,
                ReplayOutcome::Cancelled => ReplayStatus::Stopped,
            };
            ReplayResult {
                success: outcome == ReplayOutcome::Finished && progress.failed == 0,
                outcome,
                completed: progress.completed,
                failed: progress.failed,
                total: progress.total,
                errors: progress.errors.clone(),
                duration_ms: self.duration_ms(),
            }
        };

        info!(
            ?outcome,
            completed = result.completed,
            failed = result.failed,
            total = result.total,
            duration_ms = result.duration_ms,
            "replay finished"
        );
        self.notify();
        Ok(result)
    }

    /// Running → paused. Elapsed time stops counting until `resume`.
    ///
    /// Also accepted before `replay` is entered: the run then begins paused.
    pub fn pause(&self) -> Result<()> {
        {
            let mut progress = lock(&self.progress);
            if !matches!(progress.status, ReplayStatus::Running | ReplayStatus::Idle) {
                return Err(ReplayError::NotRunning(format!(
                    "cannot pause while {}",
                    progress.status
                )));
            }
            self.control.pause();
            progress.status = ReplayStatus::Paused;
        }
        debug!("replay paused");
        self.notify();
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        {
            let mut progress = lock(&self.progress);
            if progress.status != ReplayStatus::Paused {
                return Err(ReplayError::NotPaused(format!(
                    "cannot resume while {}",
                    progress.status
                )));
            }
            self.control.resume();
            progress.status = if progress.started {
                ReplayStatus::Running
            } else {
                ReplayStatus::Idle
            };
        }
        debug!("replay resumed");
        self.notify();
        Ok(())
    }

    /// Requests cancellation. Repeating it before the run unwinds is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut progress = lock(&self.progress);
        if progress.status.is_terminal() {
            return Err(ReplayError::AlreadyFinished(format!(
                "replay already {}",
                progress.status
            )));
        }
        if !progress.started {
            progress.status = ReplayStatus::Stopped;
        }
        if self.control.stop() {
            debug!("replay stop requested");
        }
        Ok(())
    }

    pub fn get_progress(&self) -> ReplayProgress {
        let progress = lock(&self.progress);
        ReplayProgress {
            current_index: progress.current_index,
            total: progress.total,
            status: progress.status,
            completed: progress.completed,
            failed: progress.failed,
            duration_ms: self.duration_ms(),
            errors: progress.errors.clone(),
        }
    }

    pub fn status(&self) -> ReplayStatus {
        lock(&self.progress).status
    }

    async fn run_actions(
        &self,
        actions: &[Action],
        start_index: usize,
        options: &ReplayOptions,
    ) -> ReplayOutcome {
        let last = actions.len().saturating_sub(1);
        for (index, action) in actions.iter().enumerate().skip(start_index) {
            if self.control.is_stopped() || self.control.wait_while_paused().await.is_err() {
                return ReplayOutcome::Cancelled;
            }

            lock(&self.progress).current_index = index;

            match self.execute_with_retry(index, action, options.retry_count).await {
                Step::Completed => {
                    lock(&self.progress).completed += 1;
                }
                Step::Failed(error) => {
                    let mut progress = lock(&self.progress);
                    progress.failed += 1;
                    progress.errors.push(error);
                }
                Step::Cancelled => return ReplayOutcome::Cancelled,
            }
            self.notify();

            if index < last {
                let delay = scaled_delay_ms(action.delay_ms(), options.speed);
                if delay > 0
                    && self
                        .control
                        .sleep(Duration::from_millis(delay))
                        .await
                        .is_err()
                {
                    return ReplayOutcome::Cancelled;
                }
            }
        }
        ReplayOutcome::Finished
    }

    async fn execute_with_retry(&self, index: usize, action: &Action, retry_count: u32) -> Step {
        let max_attempts = retry_count.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                biased;
                _ = self.control.stopped() => return Step::Cancelled,
                result = self.executor.execute(index, action) => result,
            };

            match result {
                Ok(result) if result.success => return Step::Completed,
                Ok(result) => {
                    last_error = result.error.unwrap_or_else(|| "action failed".to_string());
                }
                Err(ExecuteError::Cancelled) => return Step::Cancelled,
                Err(ExecuteError::NoDestination) => {
                    warn!(index, kind = %action.kind, "no active destination for action");
                    return Step::Failed(ActionError {
                        action_index: index,
                        action: action.clone(),
                        message: NO_ACTIVE_DESTINATION.to_string(),
                        attempts: attempt,
                    });
                }
            }

            if attempt < max_attempts {
                let delay_ms = self.retry.delay_for_attempt(attempt);
                debug!(index, attempt, delay_ms, error = %last_error, "retrying action");
                if self
                    .control
                    .sleep(Duration::from_millis(delay_ms))
                    .await
                    .is_err()
                {
                    return Step::Cancelled;
                }
            }
        }

        warn!(index, kind = %action.kind, attempts = max_attempts, error = %last_error, "action failed");
        Step::Failed(ActionError {
            action_index: index,
            action: action.clone(),
            message: last_error,
            attempts: max_attempts,
        })
    }

    /// Active time of this run plus whatever a checkpoint carried over.
    fn duration_ms(&self) -> u64 {
        let prior = self.checkpoint.as_ref().map_or(0, |c| c.prior_duration_ms);
        prior + self.control.active_elapsed().as_millis() as u64
    }

    fn notify(&self) {
        let listeners = lock(&self.listeners).snapshot();
        if listeners.is_empty() {
            return;
        }
        notify_all(&listeners, &self.get_progress());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
