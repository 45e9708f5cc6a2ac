//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。外部システム（GitHub などの
//! commit ベースの content store、時計、画像の正規化）へのインターフェースを
//! trait として定義し、実装の詳細は `impls` に置きます。
//!
//! # 設計原則
//! - RemoteStore がリモートの唯一の窓口（branch head への直接アクセスはしない）
//! - 時刻は Clock 経由（テストでは FixedClock で進める）

pub mod clock;
pub mod id_generator;
pub mod image_normalizer;
pub mod remote_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::image_normalizer::{ImageNormalizer, NormalizeError};
pub use self::remote_store::{RemoteStore, StoredObject};
