//! marquee-core
//!
//! Versioned, conflict-safe asset sync with deadline-driven expiry.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（asset 名とレイアウト, revision, 期限 ledger, 期限パーサ, errors, ids）
//! - **ports**: 抽象化レイヤー（RemoteStore, Clock, IdGenerator, ImageNormalizer）
//! - **app**: アプリケーションロジック（sync engine, rotation, ingest, reaper, builder, runtime）
//! - **impls**: 実装（GitHubStore, InMemoryRemoteStore, PassthroughNormalizer）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
