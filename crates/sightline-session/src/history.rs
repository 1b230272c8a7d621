use async_trait::async_trait;
use sightline_client::HistoryBackend;
use sightline_history::HistoryMirror;
use sightline_types::Result;
use tokio::sync::Mutex;

/// Receives word that the backend persisted a live detection.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Resynchronise and return the number of records now held.
    async fn detection_saved(&self) -> Result<usize>;
}

#[async_trait]
impl<H: HistoryBackend + 'static> HistorySink for Mutex<HistoryMirror<H>> {
    async fn detection_saved(&self) -> Result<usize> {
        let mut mirror = self.lock().await;
        Ok(mirror.refresh().await?.len())
    }
}
