//! AssetLocks - キーごとの排他
//!
//! 同じ asset への ingest と reaper の downgrade を直列化します。
//! リビジョンの前提条件は競合を「検出」するだけなので、無駄なリトライを
//! 防ぐためにここで「予防」します。
//!
//! # ロック順序
//! expiry document のパス（ledger ロック）→ asset の live パス。
//! 逆順で取るコードを書かないこと。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct AssetLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no one else holds `key`. Released on drop.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
