//! App - アプリケーション層
//!
//! ports を組み合わせて asset の同期と期限処理を実装します。
//!
//! # 主要コンポーネント
//! - **SyncEngine**: 楽観的並行制御つきの publish / remove（リモートへの唯一の書き込み経路）
//! - **ExpiryStore**: 期限 ledger の load / save
//! - **RotationManager**: 履歴スロットのローテーション
//! - **Ingestor** / **IngestLoop**: アップロードの公開
//! - **Reaper** / **ReaperLoop**: 期限切れ asset を fallback に戻す
//! - **AppBuilder** / **Runtime**: 組み立てと起動・停止

pub mod builder;
pub mod expiry_store;
pub mod ingest;
pub mod ingest_loop;
pub mod locks;
pub mod reaper_loop;
pub mod rotation;
pub mod runtime;
pub mod sync_engine;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::expiry_store::{ExpiryStore, LedgerUpdate};
pub use self::ingest::{IngestReport, IngestRequest, IngestSettings, Ingestor, LivePublish};
pub use self::ingest_loop::IngestLoop;
pub use self::locks::AssetLocks;
pub use self::reaper_loop::{ReapReport, Reaper, ReaperLoop, TickOutcome};
pub use self::rotation::{RotationManager, RotationReport};
pub use self::runtime::Runtime;
pub use self::sync_engine::{PublishOutcome, RemoveOutcome, SyncEngine, SyncPolicy};
