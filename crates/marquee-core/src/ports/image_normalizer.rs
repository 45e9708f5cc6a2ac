//! ImageNormalizer port - 画像を正規化された固定サイズの画像に変換する
//!
//! 変換そのもの（リサイズ・PNG 化）はこのクレートの外側の責務です。

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NormalizeError(pub String);

pub trait ImageNormalizer: Send + Sync {
    /// Turn an arbitrary uploaded image into the canonical picture that is
    /// published as the live asset.
    fn normalize(&self, raw: Bytes) -> Result<Bytes, NormalizeError>;
}
