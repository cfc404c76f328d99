//! Export completion notifications

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Emitted once an export file is stored and retrievable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCompleted {
    pub filename: String,
    pub download_url: String,
    pub record_count: u64,
    pub owner_id: Option<i64>,
}

/// Delivers completion events; delivery and display are up to the implementation
pub trait Notifier: Send + Sync {
    fn notify_export_completed(&self, event: ExportCompleted);
}

/// Writes events to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_export_completed(&self, event: ExportCompleted) {
        info!(
            filename = %event.filename,
            download_url = %event.download_url,
            record_count = event.record_count,
            owner_id = ?event.owner_id,
            "Export completed"
        );
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ExportCompleted>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportCompleted> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify_export_completed(&self, event: ExportCompleted) {
        LogNotifier.notify_export_completed(event.clone());
        // No subscribers is fine
        if self.tx.send(event).is_err() {
            debug!("Export completion event had no subscribers");
        }
    }
}
