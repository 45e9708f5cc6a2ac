//! IngestLoop - アップロードイベントを順に Ingestor へ流す
//!
//! イベントは 1 件ずつ処理します。同じ asset への同時 ingest は
//! `AssetLocks` でも直列化されますが、ここで並列化する理由はありません。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::ingest::{IngestRequest, Ingestor};

pub struct IngestLoop {
    ingestor: Arc<Ingestor>,
    requests: mpsc::Receiver<IngestRequest>,
}

impl IngestLoop {
    pub fn new(ingestor: Arc<Ingestor>, requests: mpsc::Receiver<IngestRequest>) -> Self {
        Self { ingestor, requests }
    }

    /// Runs until shutdown is requested or every sender is dropped.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("ingest loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let request = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                request = self.requests.recv() => request,
            };
            let Some(request) = request else {
                break;
            };

            match self.ingestor.ingest(request).await {
                Ok(report) => info!(
                    id = %report.id,
                    asset = %report.asset,
                    live = ?report.live,
                    "ingest event handled"
                ),
                Err(err) => warn!(error = %err, "ingest event rejected"),
            }
        }
        info!("ingest loop stopped");
    }
}
