//! Ingestor - アップロードされた画像を live asset として公開する
//!
//! # フロー
//! 1. 入力検査（image/* か、空でないか、予約済みの名前でないか）→ 正規化
//! 2. 期限テキストを parse（失敗は「期限なし」）
//! 3. asset ロック
//! 4. live と同一内容なら何もしない（`skip_unchanged`）
//! 5. rotate → live を publish →（任意）timestamp 付きコピー → gallery 更新
//! 6. ledger ロックを短く取り、ledger を新しい live に合わせる
//!    （期限あり: 登録 / なし: 削除）
//!
//! ロック順は常に asset → ledger（または asset → gallery）。Reaper も同じ順で取ります。

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::expiry_store::{ExpiryStore, LedgerUpdate};
use super::locks::AssetLocks;
use super::rotation::{RotationManager, RotationReport};
use super::sync_engine::{PublishOutcome, SyncEngine};
use crate::domain::gallery;
use crate::domain::{
    AssetName, ContentRevision, DeadlineParser, IngestError, IngestId, StoreError,
};
use crate::ports::{Clock, IdGenerator, ImageNormalizer};

/// One uploaded image, as delivered by the event source.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// `None` means the configured default asset.
    pub asset: Option<AssetName>,
    pub content: Bytes,
    pub content_type: Option<String>,
    pub deadline_text: Option<String>,
    /// Commit message for the live publish.
    pub label: Option<String>,
}

impl IngestRequest {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn asset(mut self, asset: AssetName) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn deadline(mut self, text: impl Into<String>) -> Self {
        self.deadline_text = Some(text.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivePublish {
    Published(ContentRevision),
    /// Upload equals the current live content; nothing was written.
    Unchanged,
    Failed(StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub id: IngestId,
    pub asset: AssetName,
    pub live: LivePublish,
    pub rotation: Option<RotationReport>,
    pub archive: Option<PublishOutcome>,
    pub gallery: Option<PublishOutcome>,
    pub deadline: Option<DateTime<Utc>>,
    pub ledger: LedgerUpdate,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub default_asset: AssetName,
    pub max_versions: u32,
    pub skip_unchanged: bool,
    pub timestamped_copies: bool,
    /// Fallback, expiry document and gallery paths; no asset may own them.
    pub reserved_paths: Vec<String>,
    pub gallery_path: Option<String>,
    pub gallery_image_base: String,
}

pub struct Ingestor {
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) rotation: Arc<RotationManager>,
    pub(crate) expiry: Arc<ExpiryStore>,
    pub(crate) locks: Arc<AssetLocks>,
    pub(crate) normalizer: Arc<dyn ImageNormalizer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) parser: DeadlineParser,
    pub(crate) settings: IngestSettings,
}

impl Ingestor {
    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestError> {
        let id = self.ids.generate_ingest_id();

        if let Some(content_type) = request.content_type.as_deref()
            && !content_type.trim().to_ascii_lowercase().starts_with("image/")
        {
            return Err(IngestError::NotAnImage(content_type.to_string()));
        }
        if request.content.is_empty() {
            return Err(IngestError::EmptyContent);
        }
        let asset = request
            .asset
            .unwrap_or_else(|| self.settings.default_asset.clone());
        self.check_name(&asset)?;

        let content = self
            .normalizer
            .normalize(request.content)
            .map_err(|e| IngestError::Normalize(e.0))?;
        if content.is_empty() {
            return Err(IngestError::EmptyContent);
        }

        let now = self.clock.now();
        let deadline = request.deadline_text.as_deref().and_then(|text| {
            let parsed = self.parser.parse(text, now);
            if parsed.is_none() {
                debug!(%id, text, "no deadline in text");
            }
            parsed
        });
        let given_label = request
            .label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty());
        let label = given_label
            .map(str::to_string)
            .unwrap_or_else(|| format!("Upload {asset}"));
        let live_path = self.rotation.layout().live_path(&asset);

        let _asset_guard = self.locks.acquire(&live_path).await;

        let (live, rotation) = self
            .publish_live(&asset, &live_path, content.clone(), &label)
            .await;

        let mut archive = None;
        let mut gallery = None;
        if self.settings.timestamped_copies && matches!(live, LivePublish::Published(_)) {
            let copy_path = self.rotation.layout().timestamped_path(&asset, now);
            let outcome = self.engine.publish(&copy_path, content, &label).await;
            if outcome.is_published()
                && let Some(gallery_path) = self.settings.gallery_path.as_deref()
            {
                let caption = given_label.unwrap_or(gallery::DEFAULT_CAPTION);
                gallery = Some(self.update_gallery(gallery_path, &copy_path, caption).await);
            }
            archive = Some(outcome);
        }

        let ledger = match &live {
            LivePublish::Failed(_) => LedgerUpdate::Unchanged,
            _ => self.record_deadline(&asset, deadline).await,
        };

        match &live {
            LivePublish::Failed(error) => {
                warn!(%id, %asset, %error, "ingest did not publish");
            }
            _ => info!(%id, %asset, live = ?live, deadline = ?deadline, ledger = ?ledger, "ingested"),
        }

        Ok(IngestReport {
            id,
            asset,
            live,
            rotation,
            archive,
            gallery,
            deadline,
            ledger,
        })
    }

    /// Rejects names whose paths overlap another asset's history or a
    /// reserved document. Runs before any store call.
    fn check_name(&self, asset: &AssetName) -> Result<(), IngestError> {
        if asset.is_derived() {
            return Err(IngestError::ReservedName(
                asset.to_string(),
                "ends like a history slot or timestamped copy".to_string(),
            ));
        }
        let layout = self.rotation.layout();
        if let Some(path) = self
            .settings
            .reserved_paths
            .iter()
            .find(|path| layout.claims(asset, path))
        {
            return Err(IngestError::ReservedName(
                asset.to_string(),
                format!("its paths include {path}"),
            ));
        }
        Ok(())
    }

    async fn publish_live(
        &self,
        asset: &AssetName,
        live_path: &str,
        content: Bytes,
        label: &str,
    ) -> (LivePublish, Option<RotationReport>) {
        if self.settings.skip_unchanged {
            match self.engine.read(live_path).await {
                Ok(Some(current)) if current.content == content => {
                    info!(%asset, "upload equals live content, skipping publish");
                    return (LivePublish::Unchanged, None);
                }
                Ok(_) => {}
                Err(err) => warn!(%asset, error = %err, "could not compare with live content"),
            }
        }

        let rotation = self
            .rotation
            .rotate(asset, self.settings.max_versions)
            .await;
        let live = match self.engine.publish(live_path, content, label).await {
            PublishOutcome::Published { revision, .. } => LivePublish::Published(revision),
            PublishOutcome::Failed { error, .. } => LivePublish::Failed(error),
        };
        (live, Some(rotation))
    }

    /// Appends the copy to the gallery page. An unreadable page is left
    /// alone rather than replaced by a fresh one.
    async fn update_gallery(
        &self,
        gallery_path: &str,
        copy_path: &str,
        caption: &str,
    ) -> PublishOutcome {
        let _gallery_guard = self.locks.acquire(gallery_path).await;
        let page = match self.engine.read(gallery_path).await {
            Ok(page) => page.map(|object| String::from_utf8_lossy(&object.content).into_owned()),
            Err(error) => {
                warn!(path = gallery_path, %error, "gallery unreadable, not updated");
                return PublishOutcome::Failed { attempts: 0, error };
            }
        };
        let src = format!("{}{copy_path}", self.settings.gallery_image_base);
        let page = gallery::append_figure(page.as_deref(), &src, caption);
        let label = format!("Add {copy_path} to gallery");
        self.engine
            .publish(gallery_path, Bytes::from(page), &label)
            .await
    }

    /// Callers hold the asset lock; the ledger lock is taken here.
    async fn record_deadline(
        &self,
        asset: &AssetName,
        deadline: Option<DateTime<Utc>>,
    ) -> LedgerUpdate {
        let _ledger_guard = self.locks.acquire(self.expiry.path()).await;
        let mut ledger = match self.expiry.try_load().await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(%asset, error = %err, "expiry ledger unreadable, deadline not recorded");
                return LedgerUpdate::SaveFailed;
            }
        };
        let changed = match deadline {
            Some(at) => ledger.set(asset.clone(), at) != Some(at),
            None => ledger.remove(asset).is_some(),
        };
        if !changed {
            return LedgerUpdate::Unchanged;
        }
        self.expiry.save(&ledger).await
    }
}
