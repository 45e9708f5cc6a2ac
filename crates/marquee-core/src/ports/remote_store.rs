//! RemoteStore port - branch 単位の commit ログを持つ content store
//!
//! 書き込み・削除は必ず「前に読んだリビジョン」を前提条件として渡します。
//! 前提条件が合わなければ store は Conflict を返し、上書きしません。
//!
//! # 実装
//! - **InMemoryRemoteStore**: テスト用（fault injection 付き）
//! - **GitHubStore**: GitHub contents API

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{ContentRevision, StoreError};

/// Content of an object together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub revision: ContentRevision,
}

/// Conflict-checked access to objects on one branch.
///
/// Every successful write or delete advances the branch head by exactly one
/// commit carrying `label` as its message.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn branch(&self) -> &str;

    /// Revision of `path` as of one consistent snapshot of the branch head.
    /// `StoreError::NotFound` when the path is absent at that head.
    async fn resolve_revision(&self, path: &str) -> Result<ContentRevision, StoreError>;

    async fn read_object(&self, path: &str) -> Result<StoredObject, StoreError>;

    /// `expected == None` creates and fails with `Conflict` if the object
    /// already exists; `Some(rev)` replaces only if the object is still at
    /// `rev`.
    async fn write_object(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&ContentRevision>,
        label: &str,
    ) -> Result<ContentRevision, StoreError>;

    async fn delete_object(
        &self,
        path: &str,
        expected: &ContentRevision,
        label: &str,
    ) -> Result<(), StoreError>;
}
