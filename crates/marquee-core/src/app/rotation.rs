//! RotationManager - 履歴スロットのシフト
//!
//! 新しい live を publish する直前に呼びます。
//!
//! ```text
//! index = N .. 1 の順に:
//!   slot[index-1] あり          -> slot[index] に copy（"rotate i→i+1"）
//!   slot[index-1] なし, index=N -> slot[N] を削除（保持窓から落ちる）
//!   slot[index-1] なし, index<N -> 何もしない（gap はそのまま、捏造しない）
//! ```
//!
//! 各スロットの書き込みは独立した作業単位です。1 つ失敗しても残りは続けます。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::sync_engine::{PublishOutcome, RemoveOutcome, SyncEngine};
use crate::domain::{AssetLayout, AssetName, VersionSlot};

/// Per-slot result of one rotation, keyed by destination slot index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub copied: Vec<u32>,
    pub dropped: Vec<u32>,
    pub skipped: Vec<u32>,
    pub failed: Vec<u32>,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RotationManager {
    engine: Arc<SyncEngine>,
    layout: AssetLayout,
}

impl RotationManager {
    pub fn new(engine: Arc<SyncEngine>, layout: AssetLayout) -> Self {
        Self { engine, layout }
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    /// Callers hold the asset's lock.
    pub async fn rotate(&self, asset: &AssetName, max_versions: u32) -> RotationReport {
        let mut report = RotationReport::default();

        for index in (1..=max_versions).rev() {
            let slot = VersionSlot::new(index);
            let Some(source_slot) = slot.predecessor() else {
                continue;
            };
            let source = self.layout.slot_path(asset, source_slot);
            let target = self.layout.slot_path(asset, slot);

            let source_object = match self.engine.read(&source).await {
                Ok(object) => object,
                Err(err) => {
                    warn!(%asset, %source, error = %err, "rotation read failed");
                    report.failed.push(index);
                    continue;
                }
            };

            match source_object {
                Some(object) => {
                    let label = format!("rotate {source_slot}→{slot}");
                    match self.engine.publish(&target, object.content, &label).await {
                        PublishOutcome::Published { .. } => report.copied.push(index),
                        PublishOutcome::Failed { .. } => report.failed.push(index),
                    }
                }
                None if index == max_versions => {
                    let label = format!("rotate drop {slot}");
                    match self.engine.remove(&target, &label).await {
                        RemoveOutcome::Removed { .. } => report.dropped.push(index),
                        RemoveOutcome::Absent => report.skipped.push(index),
                        RemoveOutcome::Failed { .. } => report.failed.push(index),
                    }
                }
                None => {
                    debug!(%asset, %source, "no source slot, leaving gap");
                    report.skipped.push(index);
                }
            }
        }

        info!(
            %asset,
            copied = report.copied.len(),
            dropped = report.dropped.len(),
            failed = report.failed.len(),
            "rotation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sync_engine::SyncPolicy;
    use crate::impls::{Fault, InMemoryRemoteStore};
    use bytes::Bytes;

    fn poster() -> AssetName {
        AssetName::parse("poster").unwrap()
    }

    fn manager(store: &InMemoryRemoteStore) -> RotationManager {
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncPolicy::default());
        RotationManager::new(Arc::new(engine), AssetLayout::default())
    }

    async fn content(store: &InMemoryRemoteStore, path: &str) -> Option<String> {
        store
            .object(path)
            .await
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    /// rotate してから live を publish する（ingest と同じ手順）
    async fn upload(manager: &RotationManager, max: u32, body: &str) {
        manager.rotate(&poster(), max).await;
        manager
            .engine
            .publish("uploads/poster.png", Bytes::from(body.to_string()), "upload")
            .await;
    }

    #[tokio::test]
    async fn full_ring_shifts_and_drops_oldest() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;
        store.seed("uploads/poster-1.png", "h1").await;
        store.seed("uploads/poster-2.png", "h2").await;
        store.seed("uploads/poster-3.png", "h3").await;

        let report = manager(&store).rotate(&poster(), 3).await;

        assert_eq!(report.copied, vec![3, 2, 1]);
        assert!(report.is_clean());
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("live"));
        assert_eq!(content(&store, "uploads/poster-2.png").await.as_deref(), Some("h1"));
        assert_eq!(content(&store, "uploads/poster-3.png").await.as_deref(), Some("h2"));
        assert_eq!(content(&store, "uploads/poster-4.png").await, None);
    }

    #[tokio::test]
    async fn commit_labels_name_the_move() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;

        manager(&store).rotate(&poster(), 2).await;

        let labels: Vec<String> = store.commits().await.into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["seed".to_string(), "rotate 0→1".to_string()]);
    }

    #[tokio::test]
    async fn gaps_are_preserved_not_fabricated() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;
        // slot 1 は存在しない
        store.seed("uploads/poster-2.png", "h2").await;

        let report = manager(&store).rotate(&poster(), 4).await;

        assert_eq!(report.copied, vec![3, 1]);
        assert_eq!(report.skipped, vec![4, 2]);
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("live"));
        assert_eq!(content(&store, "uploads/poster-3.png").await.as_deref(), Some("h2"));
        assert_eq!(content(&store, "uploads/poster-4.png").await, None);
    }

    #[tokio::test]
    async fn nothing_live_means_nothing_written() {
        let store = InMemoryRemoteStore::default();
        let report = manager(&store).rotate(&poster(), 3).await;
        assert_eq!(report.skipped, vec![3, 2, 1]);
        assert!(store.commits().await.is_empty());
    }

    #[tokio::test]
    async fn last_slot_without_source_is_dropped() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;
        store.seed("uploads/poster-2.png", "stale").await;

        let report = manager(&store).rotate(&poster(), 2).await;
        assert_eq!(report.dropped, vec![2]);
        assert_eq!(content(&store, "uploads/poster-2.png").await, None);
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn single_version_keeps_previous_live() {
        let store = InMemoryRemoteStore::default();
        let manager = manager(&store);
        for body in ["a", "b", "c"] {
            upload(&manager, 1, body).await;
        }
        assert_eq!(content(&store, "uploads/poster.png").await.as_deref(), Some("c"));
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("b"));
        assert_eq!(store.paths().await.len(), 2);
    }

    #[tokio::test]
    async fn depth_never_exceeds_max_versions() {
        let store = InMemoryRemoteStore::default();
        let manager = manager(&store);
        for n in 0..8 {
            upload(&manager, 3, &format!("v{n}")).await;
        }

        let paths = store.paths().await;
        assert_eq!(
            paths,
            vec![
                "uploads/poster-1.png".to_string(),
                "uploads/poster-2.png".to_string(),
                "uploads/poster-3.png".to_string(),
                "uploads/poster.png".to_string(),
            ]
        );
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("v6"));
        assert_eq!(content(&store, "uploads/poster-3.png").await.as_deref(), Some("v4"));
    }

    #[tokio::test]
    async fn one_failed_slot_does_not_stop_the_rest() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;
        store.seed("uploads/poster-1.png", "h1").await;
        store.inject("uploads/poster-2.png", Fault::Conflict).await;
        store.inject("uploads/poster-2.png", Fault::Conflict).await;

        let report = manager(&store).rotate(&poster(), 2).await;
        assert_eq!(report.failed, vec![2]);
        assert_eq!(report.copied, vec![1]);
        assert_eq!(content(&store, "uploads/poster-1.png").await.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn zero_versions_is_a_no_op() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "live").await;
        let report = manager(&store).rotate(&poster(), 0).await;
        assert_eq!(report, RotationReport::default());
    }
}
