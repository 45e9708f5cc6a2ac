//! InMemoryRemoteStore - テスト・開発用の commit ベース store
//!
//! # 学習ポイント
//! - branch head を 1 つの Mutex の中に閉じ込め、resolve/write を同じ
//!   スナップショットに対して行う
//! - fault injection で「resolve と write の間に head が動いた」状況を再現する

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::domain::{ContentRevision, StoreError};
use crate::ports::{RemoteStore, StoredObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    Write,
    Delete,
}

/// One entry of the branch's commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub seq: u64,
    pub path: String,
    pub action: CommitAction,
    pub label: String,
}

/// Failure injected into the next write or delete of a path.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Reject with `Conflict` without touching the object.
    Conflict,
    /// Reject with `Transient` without touching the object.
    Transient,
    /// Another writer commits this content to the path first, so the
    /// caller's precondition goes stale for real.
    ConcurrentWrite(Bytes),
}

#[derive(Debug, Clone)]
struct Entry {
    content: Bytes,
    revision: ContentRevision,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, Entry>,
    commits: Vec<CommitRecord>,
    write_faults: HashMap<String, VecDeque<Fault>>,
    read_faults: HashMap<String, usize>,
    mutation_attempts: HashMap<String, usize>,
    next_revision: u64,
    latency: Duration,
}

impl StoreState {
    fn commit(&mut self, path: &str, action: CommitAction, label: &str) {
        let seq = self.commits.len() as u64 + 1;
        self.commits.push(CommitRecord {
            seq,
            path: path.to_string(),
            action,
            label: label.to_string(),
        });
    }

    fn put(&mut self, path: &str, content: Bytes, label: &str) -> ContentRevision {
        self.next_revision += 1;
        let revision = ContentRevision::new(format!("{:040x}", self.next_revision));
        self.objects.insert(
            path.to_string(),
            Entry {
                content,
                revision: revision.clone(),
            },
        );
        self.commit(path, CommitAction::Write, label);
        revision
    }

    /// Count the attempt and apply the next injected fault, if any.
    fn before_mutation(&mut self, path: &str) -> Result<(), StoreError> {
        *self.mutation_attempts.entry(path.to_string()).or_default() += 1;
        let fault = self
            .write_faults
            .get_mut(path)
            .and_then(|faults| faults.pop_front());
        match fault {
            None => Ok(()),
            Some(Fault::Conflict) => Err(StoreError::Conflict("injected conflict".into())),
            Some(Fault::Transient) => Err(StoreError::Transient("injected failure".into())),
            Some(Fault::ConcurrentWrite(content)) => {
                self.put(path, content, "concurrent writer");
                Ok(())
            }
        }
    }

    fn check_precondition(
        &self,
        path: &str,
        expected: Option<&ContentRevision>,
    ) -> Result<(), StoreError> {
        match (self.objects.get(path), expected) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(StoreError::Conflict(format!("{path} already exists"))),
            (None, Some(_)) => Err(StoreError::Conflict(format!("{path} no longer exists"))),
            (Some(entry), Some(expected)) if &entry.revision == expected => Ok(()),
            (Some(entry), Some(expected)) => Err(StoreError::Conflict(format!(
                "{path} is at {} not {}",
                entry.revision, expected
            ))),
        }
    }
}

/// In-memory branch with a full commit log.
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    branch: String,
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryRemoteStore {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    /// Commit `content` at `path` as if someone else put it there.
    pub async fn seed(&self, path: &str, content: impl Into<Bytes>) -> ContentRevision {
        let mut state = self.state.lock().await;
        state.put(path, content.into(), "seed")
    }

    pub async fn inject(&self, path: &str, fault: Fault) {
        let mut state = self.state.lock().await;
        state
            .write_faults
            .entry(path.to_string())
            .or_default()
            .push_back(fault);
    }

    /// The next `times` reads of `path` fail with `Transient`.
    pub async fn fail_reads(&self, path: &str, times: usize) {
        let mut state = self.state.lock().await;
        state.read_faults.insert(path.to_string(), times);
    }

    pub async fn object(&self, path: &str) -> Option<Bytes> {
        let state = self.state.lock().await;
        state.objects.get(path).map(|entry| entry.content.clone())
    }

    pub async fn paths(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.objects.keys().cloned().collect()
    }

    pub async fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().await.commits.clone()
    }

    /// Every later call sleeps `latency` before touching the branch, so
    /// concurrent callers interleave at each store call.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    async fn pause(&self) {
        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Write and delete calls made against `path`, successful or not.
    pub async fn mutation_attempts(&self, path: &str) -> usize {
        let state = self.state.lock().await;
        state.mutation_attempts.get(path).copied().unwrap_or(0)
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new("main")
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn branch(&self) -> &str {
        &self.branch
    }

    async fn resolve_revision(&self, path: &str) -> Result<ContentRevision, StoreError> {
        self.pause().await;
        let state = self.state.lock().await;
        state
            .objects
            .get(path)
            .map(|entry| entry.revision.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn read_object(&self, path: &str) -> Result<StoredObject, StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.read_faults.get_mut(path)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Transient("injected read failure".into()));
        }
        state
            .objects
            .get(path)
            .map(|entry| StoredObject {
                content: entry.content.clone(),
                revision: entry.revision.clone(),
            })
            .ok_or(StoreError::NotFound)
    }

    async fn write_object(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&ContentRevision>,
        label: &str,
    ) -> Result<ContentRevision, StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.before_mutation(path)?;
        state.check_precondition(path, expected)?;
        Ok(state.put(path, content, label))
    }

    async fn delete_object(
        &self,
        path: &str,
        expected: &ContentRevision,
        label: &str,
    ) -> Result<(), StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.before_mutation(path)?;
        state.check_precondition(path, Some(expected))?;
        state.objects.remove(path);
        state.commit(path, CommitAction::Delete, label);
        Ok(())
    }
}
