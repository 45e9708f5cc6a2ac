//! AppBuilder - 設定と ports から App を組み立てる
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定の不整合は `build()` で止める
//! - store / clock / normalizer / id 生成器は差し替え可能（テストでは in-memory と FixedClock）

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use super::expiry_store::ExpiryStore;
use super::ingest::{IngestSettings, Ingestor};
use super::locks::AssetLocks;
use super::reaper_loop::Reaper;
use super::rotation::RotationManager;
use super::sync_engine::{SyncEngine, SyncPolicy};
use crate::config::{ConfigError, MarqueeConfig};
use crate::impls::PassthroughNormalizer;
use crate::ports::{Clock, IdGenerator, ImageNormalizer, RemoteStore, SystemClock, UlidGenerator};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(store)
///     .config(MarqueeConfig::load("marquee.toml")?)
///     .build()?;
/// ```
pub struct AppBuilder {
    store: Arc<dyn RemoteStore>,
    config: MarqueeConfig,
    clock: Option<Arc<dyn Clock>>,
    normalizer: Option<Arc<dyn ImageNormalizer>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            config: MarqueeConfig::default(),
            clock: None,
            normalizer: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: MarqueeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// 省略時は clock を共有する `UlidGenerator`
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let normalizer = self
            .normalizer
            .unwrap_or_else(|| Arc::new(PassthroughNormalizer));

        let assets = &config.assets;
        let layout = assets.layout();
        let parser = config.deadline.parser()?;
        let settings = IngestSettings {
            default_asset: assets.default_asset()?,
            max_versions: assets.max_versions,
            skip_unchanged: assets.skip_unchanged,
            timestamped_copies: assets.timestamped_copies,
            reserved_paths: assets.reserved_paths(),
            gallery_path: assets.gallery_path.clone(),
            gallery_image_base: assets.gallery_image_base.clone(),
        };

        let engine = Arc::new(SyncEngine::new(self.store, SyncPolicy::from(&config.sync)));
        let expiry = Arc::new(ExpiryStore::new(
            Arc::clone(&engine),
            assets.expiry_path.clone(),
        ));
        let rotation = Arc::new(RotationManager::new(Arc::clone(&engine), layout.clone()));
        let locks = Arc::new(AssetLocks::new());

        let ingestor = Arc::new(Ingestor {
            engine: Arc::clone(&engine),
            rotation,
            expiry: Arc::clone(&expiry),
            locks: Arc::clone(&locks),
            normalizer,
            clock: Arc::clone(&clock),
            ids: Arc::clone(&ids),
            parser,
            settings,
        });
        let reaper = Arc::new(Reaper {
            engine: Arc::clone(&engine),
            expiry: Arc::clone(&expiry),
            locks,
            layout,
            fallback_path: assets.fallback_path.clone(),
            clock,
            ids,
            running: AtomicBool::new(false),
        });

        Ok(App {
            reaper_period: config.reaper.period(),
            engine,
            expiry,
            ingestor,
            reaper,
        })
    }
}

/// 組み立て済みのコンポーネント一式
///
/// ingestor と reaper は同じ `AssetLocks` を共有しています（ロック順は asset → ledger）。
pub struct App {
    pub engine: Arc<SyncEngine>,
    pub expiry: Arc<ExpiryStore>,
    pub ingestor: Arc<Ingestor>,
    pub reaper: Arc<Reaper>,
    pub reaper_period: Duration,
}
