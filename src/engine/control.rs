//! Run-state signal shared between a running replay and its control calls.
//!
//! Every suspension point of the run loop waits on the same `watch` channel, so
//! a pause freezes in-flight waits and a stop unwinds them at once instead of
//! letting them run out.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Returned by a wait that was cut short by a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[derive(Debug, Default)]
struct PauseClock {
    started: Option<Instant>,
    finished: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

impl PauseClock {
    fn close_pause(&mut self, at: Instant) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += at.saturating_duration_since(since);
        }
    }
}

pub struct RunControl {
    state: watch::Sender<RunState>,
    clock: Mutex<PauseClock>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            state,
            clock: Mutex::new(PauseClock::default()),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    /// Marks the run as started. A stop or pause requested beforehand is kept;
    /// a pending pause starts counting paused time from here.
    pub fn begin(&self) {
        let mut clock = self.lock_clock();
        let now = Instant::now();
        *clock = PauseClock {
            started: Some(now),
            ..PauseClock::default()
        };
        self.state.send_if_modified(|state| {
            if *state == RunState::Idle {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        if self.state() == RunState::Paused {
            clock.paused_since = Some(now);
        }
    }

    /// Returns `true` if the run moved to paused. Pausing before `begin`
    /// leaves the run paused once it begins.
    pub fn pause(&self) -> bool {
        let mut clock = self.lock_clock();
        let changed = self.state.send_if_modified(|state| {
            if matches!(*state, RunState::Idle | RunState::Running) {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
        if changed && clock.started.is_some() {
            clock.paused_since = Some(Instant::now());
        }
        changed
    }

    /// Returns `true` if the run left paused: back to running, or back to
    /// idle when the pause was requested before `begin`.
    pub fn resume(&self) -> bool {
        let mut clock = self.lock_clock();
        let started = clock.started.is_some();
        let changed = self.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = if started { RunState::Running } else { RunState::Idle };
                true
            } else {
                false
            }
        });
        if changed {
            clock.close_pause(Instant::now());
        }
        changed
    }

    /// Returns `true` the first time, `false` if a stop was already requested.
    pub fn stop(&self) -> bool {
        let mut clock = self.lock_clock();
        let changed = self.state.send_if_modified(|state| {
            if *state == RunState::Stopped {
                false
            } else {
                *state = RunState::Stopped;
                true
            }
        });
        if changed {
            clock.close_pause(Instant::now());
        }
        changed
    }

    /// Freezes duration accounting at the end of a run.
    pub fn finish(&self) {
        let mut clock = self.lock_clock();
        let now = Instant::now();
        clock.close_pause(now);
        clock.finished.get_or_insert(now);
    }

    /// Time since `begin` minus time spent paused.
    pub fn active_elapsed(&self) -> Duration {
        let clock = self.lock_clock();
        let Some(started) = clock.started else {
            return Duration::ZERO;
        };
        let end = clock.finished.unwrap_or_else(Instant::now);
        let mut paused = clock.paused_total;
        if let Some(since) = clock.paused_since {
            paused += end.saturating_duration_since(since);
        }
        end.saturating_duration_since(started).saturating_sub(paused)
    }

    /// Blocks while paused. Errors once a stop is requested.
    pub async fn wait_while_paused(&self) -> Result<(), Cancelled> {
        self.sleep(Duration::ZERO).await
    }

    /// Sleeps for `duration` of running time.
    ///
    /// Time spent paused does not count against the wait; the unconsumed
    /// remainder carries over to the next resume.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let mut rx = self.state.subscribe();
        let mut remaining = duration;
        loop {
            let state = *rx.borrow_and_update();
            match state {
                RunState::Stopped => return Err(Cancelled),
                RunState::Paused => {
                    if rx.changed().await.is_err() {
                        return Err(Cancelled);
                    }
                    continue;
                }
                RunState::Idle | RunState::Running => {}
            }

            if remaining.is_zero() {
                return Ok(());
            }

            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(remaining) => return Ok(()),
                changed = rx.changed() => {
                    remaining = remaining.saturating_sub(started.elapsed());
                    if changed.is_err() {
                        return Err(Cancelled);
                    }
                }
            }
        }
    }

    /// Resolves once a stop is requested.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == RunState::Stopped).await;
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, PauseClock> {
        self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
