//! Domain model (asset names, revisions, expiry ledger, deadline parsing, gallery page).
//!
//! このモジュールは I/O を持ちません。store への読み書きは `app` 層が
//! `ports::RemoteStore` を通して行います。

pub mod asset;
pub mod deadline;
pub mod errors;
pub mod expiry;
pub mod gallery;
pub mod ids;
pub mod revision;

pub use self::asset::{AssetLayout, AssetName, AssetNameError, VersionSlot};
pub use self::deadline::DeadlineParser;
pub use self::errors::{IngestError, MetadataCorrupt, StoreError};
pub use self::expiry::ExpiryLedger;
pub use self::ids::{IngestId, PassId};
pub use self::revision::ContentRevision;
