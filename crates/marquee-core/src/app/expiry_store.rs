//! ExpiryStore - ExpiryDocument の読み書き
//!
//! 壊れた・存在しない ledger が ingest を止めてはいけないので、どちらも空の
//! ledger として読みます。読み込み自体の失敗（Transient）だけは `try_load` が
//! Err で返します。中身の分からない ledger の上に save すると他の asset の
//! 期限が消えるためです。保存は SyncEngine 経由。

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::sync_engine::{PublishOutcome, SyncEngine};
use crate::domain::{ExpiryLedger, StoreError};

/// What happened to the ExpiryDocument in one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerUpdate {
    /// No change, nothing written.
    #[default]
    Unchanged,
    Saved,
    /// The in-memory ledger stays authoritative for this pass; the next
    /// successful save carries the change.
    SaveFailed,
}

pub struct ExpiryStore {
    engine: Arc<SyncEngine>,
    path: String,
}

impl ExpiryStore {
    pub fn new(engine: Arc<SyncEngine>, path: impl Into<String>) -> Self {
        Self {
            engine,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// For read-only callers: an unreadable document also reads as empty.
    pub async fn load(&self) -> ExpiryLedger {
        match self.try_load().await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(path = %self.path, error = %err, "treating unreadable expiry ledger as empty");
                ExpiryLedger::new()
            }
        }
    }

    /// Missing or corrupt documents are empty ledgers. A failed read is an
    /// error: the caller does not know the current entries and must not
    /// save over them.
    pub async fn try_load(&self) -> Result<ExpiryLedger, StoreError> {
        let object = match self.engine.read(&self.path).await? {
            Some(object) => object,
            None => {
                debug!(path = %self.path, "no expiry ledger yet");
                return Ok(ExpiryLedger::new());
            }
        };
        match ExpiryLedger::from_document(&object.content) {
            Ok(ledger) => {
                debug!(path = %self.path, entries = ledger.len(), "expiry ledger loaded");
                Ok(ledger)
            }
            Err(err) => {
                warn!(path = %self.path, error = %err, "treating corrupt expiry ledger as empty");
                Ok(ExpiryLedger::new())
            }
        }
    }

    pub async fn save(&self, ledger: &ExpiryLedger) -> LedgerUpdate {
        let label = format!("Update expiry ledger ({} pending)", ledger.len());
        let document = Bytes::from(ledger.to_document());
        match self.engine.publish(&self.path, document, &label).await {
            PublishOutcome::Published { .. } => {
                info!(path = %self.path, entries = ledger.len(), "expiry ledger saved");
                LedgerUpdate::Saved
            }
            PublishOutcome::Failed { error, .. } => {
                warn!(path = %self.path, error = %error, "expiry ledger save failed");
                LedgerUpdate::SaveFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sync_engine::SyncPolicy;
    use crate::domain::AssetName;
    use crate::impls::{Fault, InMemoryRemoteStore};
    use chrono::{TimeZone, Utc};

    const PATH: &str = "uploads/expiry.json";

    fn expiry_store(store: &InMemoryRemoteStore) -> ExpiryStore {
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncPolicy::default());
        ExpiryStore::new(Arc::new(engine), PATH)
    }

    #[tokio::test]
    async fn missing_document_is_empty() {
        let store = InMemoryRemoteStore::default();
        assert!(expiry_store(&store).load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_is_empty() {
        let store = InMemoryRemoteStore::default();
        store.seed(PATH, "{ this is not json").await;
        assert!(expiry_store(&store).load().await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_document_is_empty_for_readers() {
        let store = InMemoryRemoteStore::default();
        store.seed(PATH, r#"{"poster": "2025-03-15T23:59:59Z"}"#).await;
        store.fail_reads(PATH, 1).await;
        assert!(expiry_store(&store).load().await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_document_is_an_error_for_writers() {
        let store = InMemoryRemoteStore::default();
        store.seed(PATH, r#"{"poster": "2025-03-15T23:59:59Z"}"#).await;
        store.fail_reads(PATH, 1).await;
        let expiry = expiry_store(&store);

        assert!(matches!(expiry.try_load().await, Err(StoreError::Transient(_))));
        assert_eq!(expiry.try_load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_document_is_empty_for_writers() {
        let store = InMemoryRemoteStore::default();
        store.seed(PATH, "[]").await;
        assert!(expiry_store(&store).try_load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryRemoteStore::default();
        let expiry = expiry_store(&store);

        let mut ledger = ExpiryLedger::new();
        ledger.set(
            AssetName::parse("poster").unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 15, 23, 59, 59).unwrap(),
        );
        assert_eq!(expiry.save(&ledger).await, LedgerUpdate::Saved);
        assert_eq!(expiry.load().await, ledger);

        let commits = store.commits().await;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].label, "Update expiry ledger (1 pending)");
    }

    #[tokio::test]
    async fn failed_save_is_reported_not_raised() {
        let store = InMemoryRemoteStore::default();
        store.inject(PATH, Fault::Transient).await;
        store.inject(PATH, Fault::Transient).await;

        let outcome = expiry_store(&store).save(&ExpiryLedger::new()).await;
        assert_eq!(outcome, LedgerUpdate::SaveFailed);
        assert_eq!(store.object(PATH).await, None);
    }
}
