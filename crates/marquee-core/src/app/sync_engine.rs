//! SyncEngine - リモートへの唯一の書き込み経路
//!
//! # フロー（publish）
//! 1. 現在のリビジョンを resolve（NotFound は「新規作成」）
//! 2. そのリビジョンを前提条件に write
//! 3. Conflict / Transient なら resolve からやり直す（合計 `max_attempts` 回）
//! 4. それでも駄目なら `PublishOutcome::Failed` を返す（panic も Err もしない）
//!
//! 再帰ではなく有界ループにしているので、リトライ回数は設定値で監査できます。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::domain::{ContentRevision, StoreError};
use crate::ports::{RemoteStore, StoredObject};

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// First try plus retries. 2 means "retry exactly once".
    pub max_attempts: u32,
    /// Upper bound on a single store call; elapsing counts as `Transient`.
    pub call_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&SyncSettings> for SyncPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        revision: ContentRevision,
        attempts: u32,
    },
    /// The publish did not happen. Never fatal to the caller.
    Failed { attempts: u32, error: StoreError },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { attempts: u32 },
    /// Nothing at the path (possibly removed by someone else meanwhile).
    Absent,
    Failed { attempts: u32, error: StoreError },
}

pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    policy: SyncPolicy,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, policy: SyncPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn branch(&self) -> &str {
        self.store.branch()
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.policy.call_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Transient(format!(
                    "store call timed out after {:?}",
                    self.policy.call_timeout
                )))
            })
    }

    /// `Ok(None)` when the object does not exist.
    pub async fn revision(&self, path: &str) -> Result<Option<ContentRevision>, StoreError> {
        match self.call(self.store.resolve_revision(path)).await {
            Ok(revision) => Ok(Some(revision)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `Ok(None)` when the object does not exist.
    pub async fn read(&self, path: &str) -> Result<Option<StoredObject>, StoreError> {
        match self.call(self.store.read_object(path)).await {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn publish(&self, path: &str, content: Bytes, label: &str) -> PublishOutcome {
        let max_attempts = self.max_attempts();
        let mut last_error = StoreError::Transient("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let expected = match self.revision(path).await {
                Ok(expected) => expected,
                Err(err) => {
                    warn!(path, attempt, error = %err, "resolve failed");
                    last_error = err;
                    continue;
                }
            };
            debug!(path, attempt, expected = ?expected, "writing");

            let write = self
                .store
                .write_object(path, content.clone(), expected.as_ref(), label);
            match self.call(write).await {
                Ok(revision) => {
                    info!(path, attempt, %revision, label, "published");
                    return PublishOutcome::Published { revision, attempts: attempt };
                }
                Err(err) => {
                    warn!(path, attempt, error = %err, "write rejected");
                    last_error = err;
                }
            }
        }

        warn!(path, attempts = max_attempts, error = %last_error, "publish failed");
        PublishOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }

    pub async fn remove(&self, path: &str, label: &str) -> RemoveOutcome {
        let max_attempts = self.max_attempts();
        let mut last_error = StoreError::Transient("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let expected = match self.revision(path).await {
                Ok(Some(expected)) => expected,
                Ok(None) => {
                    debug!(path, attempt, "nothing to remove");
                    return RemoveOutcome::Absent;
                }
                Err(err) => {
                    warn!(path, attempt, error = %err, "resolve failed");
                    last_error = err;
                    continue;
                }
            };

            match self.call(self.store.delete_object(path, &expected, label)).await {
                Ok(()) => {
                    info!(path, attempt, label, "removed");
                    return RemoveOutcome::Removed { attempts: attempt };
                }
                Err(err) => {
                    warn!(path, attempt, error = %err, "delete rejected");
                    last_error = err;
                }
            }
        }

        warn!(path, attempts = max_attempts, error = %last_error, "remove failed");
        RemoveOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}
