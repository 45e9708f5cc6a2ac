//! PassthroughNormalizer - 受け取った画像をそのまま使う

use bytes::Bytes;

use crate::ports::{ImageNormalizer, NormalizeError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNormalizer;

impl ImageNormalizer for PassthroughNormalizer {
    fn normalize(&self, raw: Bytes) -> Result<Bytes, NormalizeError> {
        Ok(raw)
    }
}
