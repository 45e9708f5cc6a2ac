//! Errors - エラー型と分類
//!
//! Store 操作の失敗は三種類に分類します。
//! - NotFound: オブジェクトが存在しない（エラーではなく「新規作成」の合図）
//! - Conflict: リビジョン不一致（1 回だけリトライ）
//! - Transient: ネットワーク・レート制限・タイムアウト（1 回だけリトライ）

/// Failure of a single remote store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("revision conflict: {0}")]
    Conflict(String),

    #[error("transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// The expiry document exists but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expiry document is corrupt: {0}")]
pub struct MetadataCorrupt(pub String);

/// Ingestion input rejected before any store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("content type {0:?} is not an image")]
    NotAnImage(String),

    #[error("uploaded content is empty")]
    EmptyContent,

    #[error("image normalization failed: {0}")]
    Normalize(String),

    /// The asset would write over another asset's history, the fallback,
    /// the expiry document or the gallery.
    #[error("asset name {0:?} is reserved: {1}")]
    ReservedName(String, String),
}
