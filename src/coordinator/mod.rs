//! Multi-job coordination.
//!
//! The [`Coordinator`] owns the job registry, persists every transition and
//! progress update, relays each action of a running job to the
//! [`ExecutionPort`], and answers the control protocol. Every mutation of a
//! job record happens under the registry lock, which is also held while the
//! registry is written to the store, so control calls and progress updates on
//! the same job never interleave.

mod job;
pub mod protocol;
mod relay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ExecutionContext, ExecutionResult};
use crate::config::ReplayConfig;
use crate::engine::{PartialOptions, ReplayEngine, ReplayOptions, ReplayProgress, ReplayResult};
use crate::error::{ReplayError, Result};
use crate::executor::ExecutionPort;
use crate::store::JobStore;

pub use job::{Job, JobProgress, JobSnapshot, JobStatus, SnapshotProgress};
pub use protocol::{Request, Response};
pub use relay::{PendingTable, RelayExecutor};

/// A replay request as accepted by [`Coordinator::start`].
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub actions: Vec<Action>,
    pub options: PartialOptions,
    pub context: ExecutionContext,
}

impl StartRequest {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: PartialOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    Job(JobSnapshot),
    All(Vec<JobSnapshot>),
}

struct JobEntry {
    job: Job,
    /// Present while a run is in flight; recovered jobs have none until resumed.
    engine: Option<Arc<ReplayEngine>>,
}

struct Inner {
    config: ReplayConfig,
    store: Arc<dyn JobStore>,
    port: Arc<dyn ExecutionPort>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    pending: Arc<PendingTable>,
    sequence: AtomicU64,
}

/// Cheap to clone; every clone drives the same registry.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(config: ReplayConfig, store: Arc<dyn JobStore>, port: Arc<dyn ExecutionPort>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                port,
                jobs: Mutex::new(HashMap::new()),
                pending: Arc::new(PendingTable::new()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Loads persisted jobs into the registry.
    ///
    /// Jobs that were running or paused when the previous process ended come
    /// back as `paused` with no live run; an explicit `resume` continues them.
    /// Returns how many such jobs were re-admitted.
    pub async fn recover(&self) -> Result<usize> {
        let stored = self.inner.store.load().await?;
        let mut jobs = self.inner.jobs.lock().await;
        let mut interrupted = 0;

        for (id, mut job) in stored {
            if jobs.contains_key(&id) {
                continue;
            }
            if !job.status.is_terminal() {
                job.status = JobStatus::Paused;
                interrupted += 1;
            }
            jobs.insert(id, JobEntry { job, engine: None });
        }

        self.persist(&jobs).await?;
        info!(jobs = jobs.len(), interrupted, "recovered job registry");
        Ok(interrupted)
    }

    /// Validates the request, records the job and begins its run.
    ///
    /// Returns as soon as the job is persisted; poll [`Coordinator::status`]
    /// for progress.
    pub async fn start(&self, request: StartRequest) -> Result<String> {
        let (job_id, _) = self.start_tracked(request).await?;
        Ok(job_id)
    }

    /// Like [`Coordinator::start`] but returns only once the job reached a
    /// terminal status and that status was persisted.
    pub async fn start_and_wait(&self, request: StartRequest) -> Result<String> {
        let (job_id, run) = self.start_tracked(request).await?;
        if let Err(e) = run.await {
            error!(%job_id, error = %e, "job driver task failed");
        }
        Ok(job_id)
    }

    /// Like [`Coordinator::start`], also returning the driver task. The task
    /// completes once the job's terminal status is persisted.
    pub async fn start_tracked(&self, request: StartRequest) -> Result<(String, JoinHandle<()>)> {
        let options = request.options.resolve(self.default_options());
        self.inner
            .config
            .limits()
            .validate(request.actions.len(), &options)?;

        let job_id = self.next_job_id();
        let engine = Arc::new(self.build_engine(&job_id, request.context.clone()));
        let job = Job::new(job_id.clone(), request.actions, options, request.context);
        let actions = job.actions.clone();

        {
            let mut jobs = self.inner.jobs.lock().await;
            jobs.insert(
                job_id.clone(),
                JobEntry {
                    job,
                    engine: Some(engine.clone()),
                },
            );
            if let Err(e) = self.persist(&jobs).await {
                jobs.remove(&job_id);
                return Err(e);
            }
        }

        info!(%job_id, actions = actions.len(), speed = options.speed, "job started");
        let run = self.spawn_driver(job_id.clone(), engine, actions, options);
        Ok((job_id, run))
    }

    pub async fn stop(&self, job_id: &str) -> Result<()> {
        let context = {
            let mut jobs = self.inner.jobs.lock().await;
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| ReplayError::JobNotFound(job_id.to_string()))?;

            entry.job.transition(JobStatus::Stopped)?;
            if let Some(engine) = &entry.engine
                && let Err(e) = engine.stop()
            {
                debug!(%job_id, error = %e, "engine already finished while stopping");
            }
            let context = entry.job.execution_context.clone();
            self.persist_logged(&jobs).await;
            context
        };

        let dropped = self.inner.pending.cancel_job(job_id);
        info!(%job_id, dropped_pending = dropped, "job stopped");

        if let Err(e) = self.inner.port.notify_stopped(job_id, &context).await {
            warn!(%job_id, error = %e, "failed to notify executor of stop");
        }
        Ok(())
    }

    pub async fn pause(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| ReplayError::JobNotFound(job_id.to_string()))?;

        if entry.job.status.is_terminal() {
            return Err(ReplayError::AlreadyFinished(job_id.to_string()));
        }
        if entry.job.status != JobStatus::Running {
            return Err(ReplayError::NotRunning(job_id.to_string()));
        }
        if let Some(engine) = &entry.engine {
            engine.pause()?;
        }
        entry.job.transition(JobStatus::Paused)?;
        self.persist_logged(&jobs).await;
        info!(%job_id, "job paused");
        Ok(())
    }

    pub async fn resume(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| ReplayError::JobNotFound(job_id.to_string()))?;

        if entry.job.status.is_terminal() {
            return Err(ReplayError::AlreadyFinished(job_id.to_string()));
        }
        if entry.job.status != JobStatus::Paused {
            return Err(ReplayError::NotPaused(job_id.to_string()));
        }

        match entry.engine.clone() {
            Some(engine) => {
                engine.resume()?;
                entry.job.transition(JobStatus::Running)?;
            }
            None => {
                // Interrupted by a restart: continue with a fresh engine.
                let checkpoint = entry.job.checkpoint();
                info!(%job_id, next_index = checkpoint.next_index, "continuing recovered job");
                let engine = Arc::new(
                    self.build_engine(job_id, entry.job.execution_context.clone())
                        .with_checkpoint(checkpoint),
                );
                entry.job.transition(JobStatus::Running)?;
                entry.engine = Some(engine.clone());
                let actions = entry.job.actions.clone();
                let options = entry.job.options;
                self.spawn_driver(job_id.to_string(), engine, actions, options);
            }
        }
        self.persist_logged(&jobs).await;
        info!(%job_id, "job resumed");
        Ok(())
    }

    /// Snapshot of one job, or of every known job when `job_id` is `None`.
    pub async fn status(&self, job_id: Option<&str>) -> Result<StatusReport> {
        let jobs = self.inner.jobs.lock().await;
        match job_id {
            Some(id) => jobs
                .get(id)
                .map(|entry| StatusReport::Job(live_snapshot(entry)))
                .ok_or_else(|| ReplayError::JobNotFound(id.to_string())),
            None => {
                let mut all: Vec<JobSnapshot> = jobs.values().map(live_snapshot).collect();
                all.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
                Ok(StatusReport::All(all))
            }
        }
    }

    /// Accepts an out-of-band result for `(job_id, action_index)`.
    ///
    /// Returns `false` when the result was discarded: the job already ended,
    /// or nothing was waiting for that action (late or duplicate delivery).
    pub async fn deliver(
        &self,
        job_id: &str,
        action_index: usize,
        result: ExecutionResult,
    ) -> Result<bool> {
        {
            let jobs = self.inner.jobs.lock().await;
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| ReplayError::JobNotFound(job_id.to_string()))?;
            if entry.job.status.is_terminal() {
                debug!(%job_id, action_index, status = %entry.job.status, "discarding late result");
                return Ok(false);
            }
        }

        let accepted = self.inner.pending.resolve(job_id, action_index, result);
        if !accepted {
            debug!(%job_id, action_index, "no pending action for delivered result");
        }
        Ok(accepted)
    }

    /// Removes terminal jobs whose `end_time` is older than the retention window.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let retention = self.inner.config.retention();
        let mut jobs = self.inner.jobs.lock().await;
        let expired: Vec<String> = jobs
            .values()
            .filter(|entry| entry.job.is_expired(now, retention))
            .map(|entry| entry.job.id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }
        for id in &expired {
            jobs.remove(id);
        }
        self.persist(&jobs).await?;
        info!(removed = expired.len(), "pruned expired jobs");
        Ok(expired)
    }

    /// Runs [`Coordinator::prune_expired`] periodically until every handle
    /// to this coordinator is dropped.
    pub fn spawn_retention_sweep(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("retention sweep shutting down");
                    break;
                };
                let coordinator = Coordinator { inner };
                if let Err(e) = coordinator.prune_expired(Utc::now()).await {
                    error!(error = %e, "retention sweep failed");
                }
            }
        })
    }

    /// Answers one control-protocol request. Errors become failure responses.
    pub async fn handle(&self, request: Request) -> Response {
        let outcome = match request {
            Request::Start {
                actions,
                options,
                context,
            } => self
                .start(StartRequest {
                    actions,
                    options,
                    context,
                })
                .await
                .map(Response::started),
            Request::Stop { job_id } => self.stop(&job_id).await.map(|_| Response::ok()),
            Request::Pause { job_id } => self.pause(&job_id).await.map(|_| Response::ok()),
            Request::Resume { job_id } => self.resume(&job_id).await.map(|_| Response::ok()),
            Request::Status { job_id } => {
                self.status(job_id.as_deref())
                    .await
                    .map(|report| match report {
                        StatusReport::Job(snapshot) => Response::job(snapshot),
                        StatusReport::All(snapshots) => Response::jobs(snapshots),
                    })
            }
            Request::Execute {
                job_id,
                action_index,
                response,
            } => self
                .deliver(&job_id, action_index, response)
                .await
                .map(Response::accepted),
        };

        outcome.unwrap_or_else(|e| {
            debug!(error = %e, code = e.code(), "control request failed");
            Response::failure(&e)
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.inner.config
    }

    fn default_options(&self) -> ReplayOptions {
        let config = &self.inner.config;
        ReplayOptions {
            speed: config.default_speed,
            retry_count: config.default_retry_count,
            timeout_ms: config.default_timeout_ms,
        }
    }

    fn next_job_id(&self) -> String {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("job_{}_{sequence}", Utc::now().timestamp_millis())
    }

    fn build_engine(&self, job_id: &str, context: ExecutionContext) -> ReplayEngine {
        let relay = RelayExecutor::new(
            job_id,
            context,
            self.inner.port.clone(),
            self.inner.pending.clone(),
        );
        ReplayEngine::new(Arc::new(relay))
            .with_limits(self.inner.config.limits())
            .with_retry_policy(self.inner.config.retry_policy())
    }

    fn spawn_driver(
        &self,
        job_id: String,
        engine: Arc<ReplayEngine>,
        actions: Vec<Action>,
        options: ReplayOptions,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.drive(job_id, engine, actions, options).await;
        })
    }

    /// Runs one engine to completion, persisting every progress notification.
    async fn drive(
        &self,
        job_id: String,
        engine: Arc<ReplayEngine>,
        actions: Vec<Action>,
        options: ReplayOptions,
    ) {
        let (tx, mut updates) = mpsc::unbounded_channel::<ReplayProgress>();
        let listener = engine.on_progress(move |progress| {
            let _ = tx.send(progress.clone());
        });

        let result = {
            let run = engine.replay(&actions, options);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    Some(progress) = updates.recv() => self.record_progress(&job_id, &progress).await,
                }
            }
        };

        engine.remove_listener(listener);
        while let Ok(progress) = updates.try_recv() {
            self.record_progress(&job_id, &progress).await;
        }

        self.finish(&job_id, &engine, result).await;
        self.inner.pending.cancel_job(&job_id);
    }

    async fn record_progress(&self, job_id: &str, progress: &ReplayProgress) {
        let mut jobs = self.inner.jobs.lock().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }
        // Status stays owned by the control calls; only counters are mirrored.
        entry.job.apply_progress(progress);
        self.persist_logged(&jobs).await;
    }

    async fn finish(&self, job_id: &str, engine: &ReplayEngine, result: Result<ReplayResult>) {
        let mut jobs = self.inner.jobs.lock().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        let job = &mut entry.job;
        entry.engine = None;

        match result {
            Ok(result) => {
                job.apply_result(&result);
                job.progress.current_index = engine.get_progress().current_index;
                if !job.status.is_terminal()
                    && let Some(status) = JobStatus::from_replay(engine.status())
                    && let Err(e) = job.transition(status)
                {
                    warn!(%job_id, error = %e, "could not record final status");
                }
                info!(
                    %job_id,
                    status = %job.status,
                    outcome = ?result.outcome,
                    completed = result.completed,
                    failed = result.failed,
                    total = result.total,
                    "job finished"
                );
            }
            Err(e) => {
                error!(%job_id, error = %e, "replay aborted");
                if !job.status.is_terminal()
                    && let Err(e) = job.transition(JobStatus::Error)
                {
                    warn!(%job_id, error = %e, "could not record final status");
                }
            }
        }
        self.persist_logged(&jobs).await;
    }

    async fn persist(&self, jobs: &HashMap<String, JobEntry>) -> Result<()> {
        let records: HashMap<String, Job> = jobs
            .iter()
            .map(|(id, entry)| (id.clone(), entry.job.clone()))
            .collect();
        self.inner.store.save(&records).await
    }

    async fn persist_logged(&self, jobs: &HashMap<String, JobEntry>) {
        if let Err(e) = self.persist(jobs).await {
            error!(error = %e, "failed to persist job registry");
        }
    }
}

/// Snapshot with the live duration of a job that is still running.
fn live_snapshot(entry: &JobEntry) -> JobSnapshot {
    let mut snapshot = entry.job.snapshot();
    if let Some(engine) = &entry.engine
        && !entry.job.status.is_terminal()
    {
        snapshot.duration_ms = engine.get_progress().duration_ms;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::executor::{ActionDispatch, DispatchOutcome};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy)]
    enum PortMode {
        Succeed,
        Fail,
        Defer,
        Unreachable,
    }

    struct MockPort {
        mode: PortMode,
        calls: StdMutex<Vec<(String, usize)>>,
        stops: StdMutex<Vec<String>>,
    }

    impl MockPort {
        fn new(mode: PortMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: StdMutex::new(Vec::new()),
                stops: StdMutex::new(Vec::new()),
            })
        }

        fn indices(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|(_, i)| *i).collect()
        }
    }

    #[async_trait]
    impl ExecutionPort for MockPort {
        async fn dispatch(&self, request: ActionDispatch) -> DispatchOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((request.job_id.clone(), request.action_index));
            match self.mode {
                PortMode::Succeed => DispatchOutcome::Completed(ExecutionResult::ok()),
                PortMode::Fail => DispatchOutcome::Completed(ExecutionResult::failed("no element")),
                PortMode::Defer => DispatchOutcome::Deferred,
                PortMode::Unreachable => DispatchOutcome::Unreachable,
            }
        }

        async fn notify_stopped(&self, job_id: &str, _context: &ExecutionContext) -> Result<()> {
            self.stops.lock().unwrap().push(job_id.to_string());
            Ok(())
        }
    }

    fn test_config() -> ReplayConfig {
        ReplayConfig {
            base_delay_ms: 1,
            min_timeout_ms: 100,
            default_retry_count: 0,
            default_timeout_ms: 10_000,
            ..ReplayConfig::default()
        }
    }

    fn coordinator(port: Arc<MockPort>) -> (Coordinator, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        (Coordinator::new(test_config(), store.clone(), port), store)
    }

    fn clicks(n: usize) -> Vec<Action> {
        (0..n).map(|_| Action::new(ActionKind::Click)).collect()
    }

    async fn snapshot(coordinator: &Coordinator, job_id: &str) -> JobSnapshot {
        match coordinator.status(Some(job_id)).await.unwrap() {
            StatusReport::Job(snapshot) => snapshot,
            StatusReport::All(_) => panic!("expected single job"),
        }
    }

    async fn wait_for<F>(coordinator: &Coordinator, job_id: &str, done: F) -> JobSnapshot
    where
        F: Fn(&JobSnapshot) -> bool,
    {
        for _ in 0..500 {
            let snap = snapshot(coordinator, job_id).await;
            if done(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached the expected state");
    }

    #[tokio::test]
    async fn successful_job_completes_and_persists() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());
        let actions = vec![
            Action::new(ActionKind::Click),
            Action::new(ActionKind::Input),
            Action::new(ActionKind::Wait).with_delay(1000),
        ];

        let job_id = coordinator
            .start_and_wait(StartRequest::new(actions))
            .await
            .unwrap();

        let snap = snapshot(&coordinator, &job_id).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!((snap.progress.completed, snap.progress.failed), (3, 0));
        assert!(snap.end_time.is_some());
        assert_eq!(port.indices(), vec![0, 1, 2]);

        let persisted = store.get(&job_id).unwrap();
        assert_eq!(persisted.status, JobStatus::Complete);
        assert_eq!(persisted.actions.len(), 3);
        assert!(store.save_count() >= 3);
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_error() {
        let port = MockPort::new(PortMode::Fail);
        let (coordinator, store) = coordinator(port.clone());

        let job_id = coordinator
            .start_and_wait(StartRequest::new(clicks(1)).with_options(PartialOptions {
                retry_count: Some(2),
                ..Default::default()
            }))
            .await
            .unwrap();

        let job = store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!((job.progress.completed_count, job.progress.failed_count), (0, 1));
        assert_eq!(job.errors[0].attempts, 3);
        assert_eq!(port.indices(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn unreachable_port_fails_each_action_once() {
        let port = MockPort::new(PortMode::Unreachable);
        let (coordinator, store) = coordinator(port.clone());

        let job_id = coordinator
            .start_and_wait(StartRequest::new(clicks(2)).with_options(PartialOptions {
                retry_count: Some(3),
                ..Default::default()
            }))
            .await
            .unwrap();

        let job = store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress.failed_count, 2);
        assert_eq!(job.errors[0].message, "no active destination");
        assert_eq!(port.indices(), vec![0, 1]);
    }

    #[tokio::test]
    async fn invalid_speed_is_rejected_before_job_exists() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());

        let err = coordinator
            .start(StartRequest::new(clicks(2)).with_options(PartialOptions {
                speed: Some(3.0),
                ..Default::default()
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::Validation(_)));
        assert_eq!(store.save_count(), 0);
        assert_eq!(
            coordinator.status(None).await.unwrap(),
            StatusReport::All(Vec::new())
        );
        assert!(port.indices().is_empty());
    }

    #[tokio::test]
    async fn empty_actions_and_bad_timeout_are_rejected() {
        let (coordinator, _) = coordinator(MockPort::new(PortMode::Succeed));
        assert!(coordinator.start(StartRequest::new(Vec::new())).await.is_err());

        let err = coordinator
            .start(StartRequest::new(clicks(1)).with_options(PartialOptions {
                timeout_ms: Some(1_000_000),
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Validation(_)));
    }

    #[tokio::test]
    async fn stop_after_second_action_freezes_progress() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());
        let actions = vec![
            Action::new(ActionKind::Click),
            Action::new(ActionKind::Click).with_delay(2000),
            Action::new(ActionKind::Click),
            Action::new(ActionKind::Click),
            Action::new(ActionKind::Click),
        ];

        let job_id = coordinator.start(StartRequest::new(actions)).await.unwrap();
        wait_for(&coordinator, &job_id, |s| s.progress.completed == 2).await;

        coordinator.stop(&job_id).await.unwrap();
        let second = coordinator.stop(&job_id).await.unwrap_err();
        assert!(matches!(second, ReplayError::AlreadyFinished(_)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = snapshot(&coordinator, &job_id).await;
        assert_eq!(snap.status, JobStatus::Stopped);
        assert_eq!(snap.progress.current, 1);
        assert_eq!(snap.progress.completed, 2);
        assert_eq!(port.indices(), vec![0, 1]);
        assert_eq!(*port.stops.lock().unwrap(), vec![job_id.clone()]);
        assert_eq!(store.get(&job_id).unwrap().status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn pause_and_resume_through_coordinator() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());
        let actions = vec![
            Action::new(ActionKind::Click).with_delay(300),
            Action::new(ActionKind::Click),
        ];

        let job_id = coordinator.start(StartRequest::new(actions)).await.unwrap();
        wait_for(&coordinator, &job_id, |s| s.progress.completed == 1).await;

        coordinator.pause(&job_id).await.unwrap();
        assert!(matches!(
            coordinator.pause(&job_id).await,
            Err(ReplayError::NotRunning(_))
        ));
        assert_eq!(store.get(&job_id).unwrap().status, JobStatus::Paused);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(port.indices(), vec![0]);

        coordinator.resume(&job_id).await.unwrap();
        assert!(matches!(
            coordinator.resume(&job_id).await,
            Err(ReplayError::NotPaused(_))
        ));

        let snap = wait_for(&coordinator, &job_id, |s| s.status.is_terminal()).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(port.indices(), vec![0, 1]);
    }

    #[tokio::test]
    async fn pause_right_after_start_holds_the_job() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());
        let actions: Vec<Action> = (0..3)
            .map(|_| Action::new(ActionKind::Click).with_delay(50))
            .collect();

        let job_id = coordinator.start(StartRequest::new(actions)).await.unwrap();
        assert_eq!(snapshot(&coordinator, &job_id).await.status, JobStatus::Running);
        coordinator.pause(&job_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(port.indices().is_empty());
        let snap = snapshot(&coordinator, &job_id).await;
        assert_eq!(snap.status, JobStatus::Paused);
        assert_eq!(snap.progress.completed, 0);
        assert_eq!(store.get(&job_id).unwrap().status, JobStatus::Paused);

        coordinator.resume(&job_id).await.unwrap();
        let snap = wait_for(&coordinator, &job_id, |s| s.status.is_terminal()).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(port.indices(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn control_calls_on_finished_job_do_not_mutate_it() {
        let (coordinator, store) = coordinator(MockPort::new(PortMode::Succeed));
        let job_id = coordinator
            .start_and_wait(StartRequest::new(clicks(1)))
            .await
            .unwrap();
        let before = store.get(&job_id).unwrap();

        assert!(matches!(
            coordinator.pause(&job_id).await,
            Err(ReplayError::AlreadyFinished(_))
        ));
        assert!(matches!(
            coordinator.resume(&job_id).await,
            Err(ReplayError::AlreadyFinished(_))
        ));
        assert!(matches!(
            coordinator.stop(&job_id).await,
            Err(ReplayError::AlreadyFinished(_))
        ));

        let after = store.get(&job_id).unwrap();
        assert_eq!(after.status, JobStatus::Complete);
        assert_eq!(after.end_time, before.end_time);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (coordinator, _) = coordinator(MockPort::new(PortMode::Succeed));
        assert!(matches!(
            coordinator.stop("job_0_0").await,
            Err(ReplayError::JobNotFound(_))
        ));
        assert!(matches!(
            coordinator.pause("job_0_0").await,
            Err(ReplayError::JobNotFound(_))
        ));
        assert!(matches!(
            coordinator.status(Some("job_0_0")).await,
            Err(ReplayError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deferred_results_are_correlated_by_job_and_index() {
        let port = MockPort::new(PortMode::Defer);
        let (coordinator, _) = coordinator(port.clone());

        let job_id = coordinator.start(StartRequest::new(clicks(2))).await.unwrap();

        for index in 0..2 {
            while port.indices().len() <= index {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert!(!coordinator
                .deliver(&job_id, index + 1, ExecutionResult::ok())
                .await
                .unwrap());
            assert!(coordinator
                .deliver(&job_id, index, ExecutionResult::ok())
                .await
                .unwrap());
        }

        let snap = wait_for(&coordinator, &job_id, |s| s.status.is_terminal()).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.progress.completed, 2);

        // Late duplicate for a finished job is discarded.
        assert!(!coordinator
            .deliver(&job_id, 1, ExecutionResult::failed("late"))
            .await
            .unwrap());
        assert_eq!(snapshot(&coordinator, &job_id).await.progress.failed, 0);
    }

    #[tokio::test]
    async fn stop_releases_action_waiting_for_deferred_result() {
        let port = MockPort::new(PortMode::Defer);
        let (coordinator, store) = coordinator(port.clone());

        let job_id = coordinator.start(StartRequest::new(clicks(3))).await.unwrap();
        while port.indices().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        coordinator.stop(&job_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(job.progress.processed(), 0);
        assert_eq!(port.indices(), vec![0]);
        assert!(!coordinator
            .deliver(&job_id, 0, ExecutionResult::ok())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn timeout_marks_job_as_error() {
        let port = MockPort::new(PortMode::Succeed);
        let (coordinator, store) = coordinator(port.clone());
        let actions: Vec<Action> = (0..3)
            .map(|_| Action::new(ActionKind::Click).with_delay(300))
            .collect();

        let job_id = coordinator
            .start_and_wait(StartRequest::new(actions).with_options(PartialOptions {
                timeout_ms: Some(400),
                ..Default::default()
            }))
            .await
            .unwrap();

        let job = store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.progress.processed() < job.progress.total);
    }

    #[tokio::test]
    async fn recovery_pauses_interrupted_jobs_and_resume_continues() {
        let mut interrupted = Job::new(
            "job_1_1".into(),
            clicks(4),
            ReplayOptions {
                speed: 1.0,
                retry_count: 0,
                timeout_ms: 10_000,
            },
            ExecutionContext::default(),
        );
        interrupted.progress.completed_count = 2;
        interrupted.progress.current_index = 1;
        interrupted.duration_ms = 50_000;

        let mut finished = Job::new(
            "job_1_2".into(),
            clicks(1),
            ReplayOptions::default(),
            ExecutionContext::default(),
        );
        finished.progress.completed_count = 1;
        finished.transition(JobStatus::Complete).unwrap();

        let store = Arc::new(MemoryJobStore::with_jobs([interrupted, finished]));
        let port = MockPort::new(PortMode::Succeed);
        let coordinator = Coordinator::new(test_config(), store.clone(), port.clone());

        assert_eq!(coordinator.recover().await.unwrap(), 1);
        assert_eq!(store.get("job_1_1").unwrap().status, JobStatus::Paused);
        assert_eq!(snapshot(&coordinator, "job_1_2").await.status, JobStatus::Complete);
        assert!(port.indices().is_empty());

        coordinator.resume("job_1_1").await.unwrap();
        let snap = wait_for(&coordinator, "job_1_1", |s| s.status.is_terminal()).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.progress.completed, 4);
        assert!(snap.duration_ms >= 50_000);
        assert!(store.get("job_1_1").unwrap().duration_ms >= 50_000);
        assert_eq!(port.indices(), vec![2, 3]);
    }

    #[tokio::test]
    async fn pause_on_recovered_job_right_after_resume() {
        let job = Job::new(
            "job_1_1".into(),
            clicks(2),
            ReplayOptions {
                speed: 1.0,
                retry_count: 0,
                timeout_ms: 10_000,
            },
            ExecutionContext::default(),
        );
        let store = Arc::new(MemoryJobStore::with_jobs([job]));
        let port = MockPort::new(PortMode::Succeed);
        let coordinator = Coordinator::new(test_config(), store.clone(), port.clone());
        coordinator.recover().await.unwrap();

        coordinator.resume("job_1_1").await.unwrap();
        coordinator.pause("job_1_1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(port.indices().is_empty());
        assert_eq!(store.get("job_1_1").unwrap().status, JobStatus::Paused);

        coordinator.resume("job_1_1").await.unwrap();
        let snap = wait_for(&coordinator, "job_1_1", |s| s.status.is_terminal()).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(port.indices(), vec![0, 1]);
    }

    #[tokio::test]
    async fn stopping_recovered_job_needs_no_engine() {
        let job = Job::new(
            "job_1_1".into(),
            clicks(2),
            ReplayOptions::default(),
            ExecutionContext::default(),
        );
        let store = Arc::new(MemoryJobStore::with_jobs([job]));
        let coordinator = Coordinator::new(test_config(), store.clone(), MockPort::new(PortMode::Succeed));
        coordinator.recover().await.unwrap();

        coordinator.stop("job_1_1").await.unwrap();
        assert_eq!(store.get("job_1_1").unwrap().status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn prune_removes_only_expired_terminal_jobs() {
        let (coordinator, store) = coordinator(MockPort::new(PortMode::Succeed));
        let done = coordinator
            .start_and_wait(StartRequest::new(clicks(1)))
            .await
            .unwrap();

        assert!(coordinator.prune_expired(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(coordinator.prune_expired(later).await.unwrap(), vec![done.clone()]);
        assert!(store.get(&done).is_none());
        assert!(matches!(
            coordinator.status(Some(&done)).await,
            Err(ReplayError::JobNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retention_sweep_ends_with_last_handle() {
        let (coordinator, _) = coordinator(MockPort::new(PortMode::Succeed));
        let sweep = coordinator.spawn_retention_sweep();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!sweep.is_finished());

        drop(coordinator);
        sweep.await.unwrap();
    }

    #[tokio::test]
    async fn job_ids_are_unique_and_ordered() {
        let (coordinator, _) = coordinator(MockPort::new(PortMode::Succeed));
        let a = coordinator.start_and_wait(StartRequest::new(clicks(1))).await.unwrap();
        let b = coordinator.start_and_wait(StartRequest::new(clicks(1))).await.unwrap();
        assert_ne!(a, b);

        match coordinator.status(None).await.unwrap() {
            StatusReport::All(jobs) => {
                let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
                assert_eq!(ids, vec![a.as_str(), b.as_str()]);
            }
            StatusReport::Job(_) => panic!("expected all jobs"),
        }
    }

    #[tokio::test]
    async fn protocol_round_trip_through_handle() {
        let (coordinator, _) = coordinator(MockPort::new(PortMode::Succeed));

        let rejected = coordinator
            .handle(Request::Start {
                actions: clicks(1),
                options: PartialOptions {
                    speed: Some(3.0),
                    ..Default::default()
                },
                context: ExecutionContext::default(),
            })
            .await;
        assert!(!rejected.success);
        assert_eq!(rejected.code.as_deref(), Some("VALIDATION"));
        assert!(rejected.job_id.is_none());

        let started = coordinator
            .handle(Request::Start {
                actions: clicks(1),
                options: PartialOptions::default(),
                context: ExecutionContext::default(),
            })
            .await;
        assert!(started.success);
        let job_id = started.job_id.unwrap();

        wait_for(&coordinator, &job_id, |s| s.status.is_terminal()).await;
        let status = coordinator
            .handle(Request::Status {
                job_id: Some(job_id.clone()),
            })
            .await;
        assert_eq!(status.status.unwrap().status, JobStatus::Complete);

        let all = coordinator.handle(Request::Status { job_id: None }).await;
        assert_eq!(all.jobs.unwrap().len(), 1);

        let pause = coordinator.handle(Request::Pause { job_id }).await;
        assert!(!pause.success);
        assert_eq!(pause.code.as_deref(), Some("ALREADY_FINISHED"));

        let missing = coordinator
            .handle(Request::Stop {
                job_id: "job_0_0".into(),
            })
            .await;
        assert_eq!(missing.code.as_deref(), Some("JOB_NOT_FOUND"));
    }
}
