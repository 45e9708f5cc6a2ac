//! Runtime - ingest loop と reaper loop を起動・停止する
//!
//! - `request_shutdown()` で両ループに停止を伝える（処理中の ingest / reap パスは最後まで走る）
//! - `shutdown_and_join()` で終了を待つ

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use super::builder::App;
use super::ingest::IngestRequest;
use super::ingest_loop::IngestLoop;
use super::reaper_loop::ReaperLoop;

pub struct Runtime {
    shutdown_tx: watch::Sender<bool>,
    requests: mpsc::Sender<IngestRequest>,
    joins: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Spawn both loops. `queue_depth` bounds pending ingest events.
    pub fn spawn(app: &App, queue_depth: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (requests, requests_rx) = mpsc::channel(queue_depth.max(1));

        let ingest = IngestLoop::new(app.ingestor.clone(), requests_rx);
        let reaper = ReaperLoop::new(app.reaper.clone(), app.reaper_period);

        let joins = vec![
            tokio::spawn(ingest.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx)),
        ];

        Self {
            shutdown_tx,
            requests,
            joins,
        }
    }

    /// Handle for feeding upload events into the ingest loop.
    pub fn sender(&self) -> mpsc::Sender<IngestRequest> {
        self.requests.clone()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "background loop panicked");
            }
        }
    }
}
