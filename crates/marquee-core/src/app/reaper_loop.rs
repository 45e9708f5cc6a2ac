//! Reaper - 期限切れの asset を fallback に戻す
//!
//! # フロー（1 パス）
//! 1. ledger ロックを短く取り、`now > expiry` のエントリを集める（無ければ何も書かない）
//! 2. fallback を 1 回だけ読む
//! 3. 各 asset: asset ロック → ledger を読み直し、期限がまだ同じか確認
//!    （その間に新しい upload があれば superseded として触らない）→ fallback を publish
//! 4. 戻したものがあれば ledger ロックを取り、読み直した ledger から外して 1 回だけ save
//!
//! ロック順は Ingestor と同じ asset → ledger。ledger ロックは publish を跨いで
//! 持たないので、別 asset の ingest はパス中も進みます。
//!
//! 1 つの asset の失敗は他の asset を止めません。失敗したエントリは ledger に
//! 残り、次のパスで再挑戦されます。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::expiry_store::{ExpiryStore, LedgerUpdate};
use super::locks::AssetLocks;
use super::sync_engine::{PublishOutcome, SyncEngine};
use crate::domain::{AssetLayout, AssetName, PassId, StoreError};
use crate::ports::{Clock, IdGenerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub pass: PassId,
    pub due: usize,
    pub downgraded: Vec<AssetName>,
    /// Re-uploaded or given a new deadline after the pass started.
    pub superseded: Vec<AssetName>,
    pub failed: Vec<AssetName>,
    pub ledger: LedgerUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(ReapReport),
    /// A pass was already running; this tick was dropped, not queued.
    Skipped,
}

/// Clears the in-flight flag even if the pass future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reaper {
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) expiry: Arc<ExpiryStore>,
    pub(crate) locks: Arc<AssetLocks>,
    pub(crate) layout: AssetLayout,
    pub(crate) fallback_path: String,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) running: AtomicBool,
}

impl Reaper {
    pub fn fallback_path(&self) -> &str {
        &self.fallback_path
    }

    /// Runs one pass unless another is still in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("reaper pass still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.running);
        TickOutcome::Ran(self.run_pass().await)
    }

    async fn run_pass(&self) -> ReapReport {
        let pass = self.ids.generate_pass_id();
        let now = self.clock.now();
        let mut report = ReapReport {
            pass,
            due: 0,
            downgraded: Vec::new(),
            superseded: Vec::new(),
            failed: Vec::new(),
            ledger: LedgerUpdate::Unchanged,
        };

        let due = {
            let _ledger_guard = self.locks.acquire(self.expiry.path()).await;
            let ledger = self.expiry.load().await;
            ledger.due(now)
        };
        report.due = due.len();
        if due.is_empty() {
            debug!(%pass, "nothing due");
            return report;
        }

        let Some(fallback) = self.read_fallback(pass).await else {
            report.failed = due.into_iter().map(|(asset, _)| asset).collect();
            return report;
        };

        let mut acted = Vec::new();
        for (asset, expires_at) in due {
            let live_path = self.layout.live_path(&asset);
            let _asset_guard = self.locks.acquire(&live_path).await;

            match self.current_expiry(&asset).await {
                Ok(Some(current)) if current == expires_at => {}
                Ok(current) => {
                    debug!(%pass, %asset, ?current, "deadline changed since pass start");
                    report.superseded.push(asset);
                    continue;
                }
                Err(error) => {
                    warn!(%pass, %asset, %error, "expiry ledger unreadable, will retry next pass");
                    report.failed.push(asset);
                    continue;
                }
            }

            let label = format!("Expire {asset} (deadline {})", expires_at.to_rfc3339());
            match self.engine.publish(&live_path, fallback.clone(), &label).await {
                PublishOutcome::Published { .. } => {
                    info!(%pass, %asset, %expires_at, "asset expired to fallback");
                    acted.push((asset.clone(), expires_at));
                    report.downgraded.push(asset);
                }
                PublishOutcome::Failed { error, .. } => {
                    warn!(%pass, %asset, %error, "expiry downgrade failed, will retry next pass");
                    report.failed.push(asset);
                }
            }
        }

        if !acted.is_empty() {
            report.ledger = self.forget(&acted).await;
        }
        info!(
            %pass,
            due = report.due,
            downgraded = report.downgraded.len(),
            superseded = report.superseded.len(),
            failed = report.failed.len(),
            ledger = ?report.ledger,
            "reaper pass finished"
        );
        report
    }

    /// Callers hold the asset lock.
    async fn current_expiry(&self, asset: &AssetName) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _ledger_guard = self.locks.acquire(self.expiry.path()).await;
        Ok(self.expiry.try_load().await?.get(asset))
    }

    /// Drops the acted-on entries from a fresh read of the ledger and saves
    /// once. An entry whose deadline changed in the meantime belongs to a
    /// newer upload and stays.
    async fn forget(&self, acted: &[(AssetName, DateTime<Utc>)]) -> LedgerUpdate {
        let _ledger_guard = self.locks.acquire(self.expiry.path()).await;
        let mut ledger = match self.expiry.try_load().await {
            Ok(ledger) => ledger,
            Err(error) => {
                warn!(%error, "expiry ledger unreadable, entries stay until next pass");
                return LedgerUpdate::SaveFailed;
            }
        };
        let mut removed = 0;
        for (asset, expires_at) in acted {
            if ledger.get(asset) == Some(*expires_at) {
                ledger.remove(asset);
                removed += 1;
            }
        }
        if removed == 0 {
            return LedgerUpdate::Unchanged;
        }
        self.expiry.save(&ledger).await
    }

    async fn read_fallback(&self, pass: PassId) -> Option<Bytes> {
        match self.engine.read(&self.fallback_path).await {
            Ok(Some(object)) => Some(object.content),
            Ok(None) => {
                error!(%pass, path = %self.fallback_path, "fallback content is missing");
                None
            }
            Err(err) => {
                error!(%pass, path = %self.fallback_path, error = %err, "fallback content unreadable");
                None
            }
        }
    }
}

/// ReaperLoop は一定周期で `Reaper::tick` を呼ぶ
///
/// パスが周期より長引いた場合、溜まった tick は捨てる（`MissedTickBehavior::Skip`）。
pub struct ReaperLoop {
    reaper: Arc<Reaper>,
    period: Duration,
}

impl ReaperLoop {
    pub fn new(reaper: Arc<Reaper>, period: Duration) -> Self {
        Self { reaper, period }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period = ?self.period, "reaper loop started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.reaper.tick().await;
                }
            }
        }
        info!("reaper loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppBuilder, IngestRequest, LivePublish};
    use crate::domain::ExpiryLedger;
    use crate::impls::{Fault, InMemoryRemoteStore};
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    const LEDGER: &str = "uploads/expiry.json";
    const FALLBACK: &str = "uploads/fallback.png";

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn name(s: &str) -> AssetName {
        AssetName::parse(s).unwrap()
    }

    fn reaper(store: &InMemoryRemoteStore, now: DateTime<Utc>) -> Arc<Reaper> {
        AppBuilder::new(Arc::new(store.clone()))
            .clock(Arc::new(FixedClock::new(now)))
            .build()
            .unwrap()
            .reaper
    }

    async fn seed_ledger(store: &InMemoryRemoteStore, entries: &[(&str, DateTime<Utc>)]) {
        let mut ledger = ExpiryLedger::new();
        for (asset, expires_at) in entries {
            ledger.set(name(asset), *expires_at);
        }
        store.seed(LEDGER, ledger.to_document()).await;
    }

    async fn ledger(store: &InMemoryRemoteStore) -> ExpiryLedger {
        ExpiryLedger::from_document(&store.object(LEDGER).await.unwrap()).unwrap()
    }

    fn ran(outcome: TickOutcome) -> ReapReport {
        match outcome {
            TickOutcome::Ran(report) => report,
            TickOutcome::Skipped => panic!("pass was skipped"),
        }
    }

    #[tokio::test]
    async fn due_asset_is_downgraded_and_entry_removed() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed("uploads/poster.png", "poster").await;
        store.seed("uploads/banner.png", "banner").await;
        seed_ledger(&store, &[("poster", at(10)), ("banner", at(20))]).await;

        let report = ran(reaper(&store, at(15)).tick().await);

        assert_eq!(report.due, 1);
        assert_eq!(report.downgraded, vec![name("poster")]);
        assert_eq!(report.ledger, LedgerUpdate::Saved);
        assert_eq!(
            store.object("uploads/poster.png").await,
            Some(Bytes::from("fallback"))
        );
        assert_eq!(
            store.object("uploads/banner.png").await,
            Some(Bytes::from("banner"))
        );
        let remaining = ledger(&store).await;
        assert_eq!(remaining.get(&name("poster")), None);
        assert_eq!(remaining.get(&name("banner")), Some(at(20)));

        let label = store
            .commits()
            .await
            .into_iter()
            .find(|c| c.path == "uploads/poster.png" && c.label != "seed")
            .unwrap()
            .label;
        assert!(label.starts_with("Expire poster (deadline 2025-03-10"));
    }

    #[tokio::test]
    async fn deadline_equal_to_now_is_not_due() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        seed_ledger(&store, &[("poster", at(10))]).await;

        let report = ran(reaper(&store, at(10)).tick().await);
        assert_eq!(report.due, 0);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed("uploads/poster.png", "poster").await;
        seed_ledger(&store, &[("poster", at(10))]).await;
        let reaper = reaper(&store, at(15));

        ran(reaper.tick().await);
        let commits = store.commits().await.len();
        let document = store.object(LEDGER).await;

        let second = ran(reaper.tick().await);

        assert_eq!(second.due, 0);
        assert_eq!(second.ledger, LedgerUpdate::Unchanged);
        assert_eq!(store.commits().await.len(), commits);
        assert_eq!(store.object(LEDGER).await, document);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed("uploads/banner.png", "banner").await;
        store.seed("uploads/poster.png", "poster").await;
        store.inject("uploads/banner.png", Fault::Transient).await;
        store.inject("uploads/banner.png", Fault::Transient).await;
        seed_ledger(&store, &[("banner", at(9)), ("poster", at(10))]).await;

        let report = ran(reaper(&store, at(15)).tick().await);

        assert_eq!(report.failed, vec![name("banner")]);
        assert_eq!(report.downgraded, vec![name("poster")]);
        let remaining = ledger(&store).await;
        assert_eq!(remaining.get(&name("banner")), Some(at(9)));
        assert_eq!(remaining.get(&name("poster")), None);
    }

    #[tokio::test]
    async fn missing_fallback_touches_nothing() {
        let store = InMemoryRemoteStore::default();
        store.seed("uploads/poster.png", "poster").await;
        seed_ledger(&store, &[("poster", at(10))]).await;
        let commits = store.commits().await.len();

        let report = ran(reaper(&store, at(15)).tick().await);

        assert_eq!(report.failed, vec![name("poster")]);
        assert_eq!(report.ledger, LedgerUpdate::Unchanged);
        assert_eq!(store.commits().await.len(), commits);
    }

    #[tokio::test]
    async fn corrupt_ledger_is_treated_as_empty() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed(LEDGER, "{ not json").await;

        let report = ran(reaper(&store, at(15)).tick().await);
        assert_eq!(report.due, 0);
        assert_eq!(store.object(LEDGER).await, Some(Bytes::from("{ not json")));
    }

    #[tokio::test]
    async fn tick_is_skipped_while_a_pass_is_running() {
        let store = InMemoryRemoteStore::default();
        let reaper = reaper(&store, at(15));
        reaper.running.store(true, Ordering::Release);

        assert_eq!(reaper.tick().await, TickOutcome::Skipped);

        reaper.running.store(false, Ordering::Release);
        assert!(matches!(reaper.tick().await, TickOutcome::Ran(_)));
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let store = InMemoryRemoteStore::default();
        let reaper_loop = ReaperLoop::new(reaper(&store, at(15)), Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(reaper_loop.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn entry_changed_after_pass_start_is_left_alone() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed("uploads/poster.png", "poster").await;
        seed_ledger(&store, &[("poster", at(10))]).await;
        let reaper = reaper(&store, at(15));

        // a newer upload re-dated the asset while the pass waited for its lock
        let live_guard = reaper.locks.acquire("uploads/poster.png").await;
        let pass = tokio::spawn({
            let reaper = Arc::clone(&reaper);
            async move { reaper.tick().await }
        });
        // let the pass load the ledger and block on the asset lock
        tokio::time::sleep(Duration::from_millis(20)).await;
        seed_ledger(&store, &[("poster", at(20))]).await;
        drop(live_guard);

        let report = ran(pass.await.unwrap());
        assert_eq!(report.superseded, vec![name("poster")]);
        assert!(report.downgraded.is_empty());
        assert_eq!(
            store.object("uploads/poster.png").await,
            Some(Bytes::from("poster"))
        );
        assert_eq!(ledger(&store).await.get(&name("poster")), Some(at(20)));
    }

    #[tokio::test]
    async fn ingest_racing_a_downgrade_ends_in_a_serial_state() {
        let store = InMemoryRemoteStore::default();
        store.seed(FALLBACK, "fallback").await;
        store.seed("uploads/poster.png", "old").await;
        seed_ledger(&store, &[("poster", at(10))]).await;
        store.set_latency(Duration::from_millis(3)).await;

        let app = AppBuilder::new(Arc::new(store.clone()))
            .clock(Arc::new(FixedClock::new(at(15))))
            .build()
            .unwrap();
        let request = IngestRequest::new("new")
            .content_type("image/png")
            .deadline("tomorrow");

        let (tick, ingested) = tokio::join!(app.reaper.tick(), app.ingestor.ingest(request));

        let report = ran(tick);
        let ingested = ingested.unwrap();
        assert!(report.failed.is_empty(), "reaper failed: {report:?}");
        assert!(matches!(ingested.live, LivePublish::Published(_)));

        // either order leaves the new upload live with its own deadline
        let tomorrow = Utc.with_ymd_and_hms(2025, 3, 16, 23, 59, 59).unwrap()
            + chrono::Duration::milliseconds(999);
        assert_eq!(
            store.object("uploads/poster.png").await,
            Some(Bytes::from("new"))
        );
        assert_eq!(ledger(&store).await.get(&name("poster")), Some(tomorrow));
        assert_eq!(ledger(&store).await.len(), 1);
    }
}
