//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryRemoteStore**: テスト・開発用の store（commit ログと fault injection）
//! - **GitHubStore**: GitHub contents API（本番用）
//! - **PassthroughNormalizer**: 画像を変換しない ImageNormalizer

pub mod github_store;
pub mod inmem_store;
pub mod normalizer;

pub use self::github_store::GitHubStore;
pub use self::inmem_store::{CommitAction, CommitRecord, Fault, InMemoryRemoteStore};
pub use self::normalizer::PassthroughNormalizer;
