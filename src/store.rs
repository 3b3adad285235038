//! Durable job snapshots.
//!
//! All jobs live under one record, [`STATE_NAMESPACE`], mapping job id to the
//! full [`Job`] including actions and options so an interrupted job can be resumed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::Job;
use crate::error::{ReplayError, Result};

pub const STATE_NAMESPACE: &str = "playback_state";

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, Job>>;

    /// Replaces the persisted record with `jobs`.
    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()>;
}

#[derive(Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(rename = "playback_state", default)]
    jobs: HashMap<String, Job>,
}

/// Keeps the namespace in a JSON file, written via a temp file and rename.
pub struct FileJobStore {
    path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load(&self) -> Result<HashMap<String, Job>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let state: StateFile = serde_json::from_str(&contents)
            .map_err(|e| ReplayError::Store(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), jobs = state.jobs.len(), "loaded job store");
        Ok(state.jobs)
    }

    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()> {
        let state = StateFile { jobs: jobs.clone() };
        let body = serde_json::to_vec_pretty(&state)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process store for tests and embedding hosts without durable storage.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
    saves: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.jobs.lock() {
            map.extend(jobs.into_iter().map(|job| (job.id.clone(), job)));
        }
        store
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self) -> Result<HashMap<String, Job>> {
        self.jobs
            .lock()
            .map(|jobs| jobs.clone())
            .map_err(|e| ReplayError::Store(e.to_string()))
    }

    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()> {
        let mut stored = self
            .jobs
            .lock()
            .map_err(|e| ReplayError::Store(e.to_string()))?;
        *stored = jobs.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, ExecutionContext};
    use crate::coordinator::JobStatus;
    use crate::engine::ReplayOptions;

    fn job(id: &str) -> Job {
        Job::new(
            id.into(),
            vec![Action::new(ActionKind::Scroll).with_delay(100)],
            ReplayOptions::default(),
            ExecutionContext(serde_json::json!({"tabId": 3})),
        )
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("state").join("jobs.json"));

        let mut jobs = HashMap::new();
        let mut done = job("job_2");
        done.transition(JobStatus::Complete).unwrap();
        jobs.insert("job_1".to_string(), job("job_1"));
        jobs.insert("job_2".to_string(), done);
        store.save(&jobs).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["job_1"].actions[0].delay, Some(100));
        assert_eq!(loaded["job_2"].status, JobStatus::Complete);
        assert!(loaded["job_2"].end_time.is_some());
    }

    #[tokio::test]
    async fn file_store_uses_namespace_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = FileJobStore::new(&path);

        let mut jobs = HashMap::new();
        jobs.insert("job_1".to_string(), job("job_1"));
        store.save(&jobs).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw[STATE_NAMESPACE]["job_1"].is_object());
        assert_eq!(raw[STATE_NAMESPACE]["job_1"]["executionContext"]["tabId"], 3);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileJobStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ReplayError::Store(_)));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryJobStore::with_jobs([job("job_1")]);
        assert!(store.get("job_1").is_some());

        let jobs = store.load().await.unwrap();
        store.save(&jobs).await.unwrap();
        store.save(&HashMap::new()).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert!(store.get("job_1").is_none());
    }
}
