//! Read-through mirror of the backend-owned detection history.

use sightline_client::HistoryBackend;
use sightline_types::{detection::HistoryRecord, Result, SightlineError};
use tracing::{info, warn};

/// Client-side copy of the backend history.
///
/// The cached list is only ever replaced wholesale by [`HistoryMirror::refresh`];
/// mutations go to the backend and are followed by a refresh.
pub struct HistoryMirror<H: HistoryBackend> {
    backend: H,
    limit: u32,
    offset: u32,
    records: Vec<HistoryRecord>,
}

impl<H: HistoryBackend> HistoryMirror<H> {
    pub fn new(backend: H, limit: u32) -> Self {
        Self {
            backend,
            limit,
            offset: 0,
            records: Vec::new(),
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&HistoryRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Refetch the list, most recent first.
    pub async fn refresh(&mut self) -> Result<&[HistoryRecord]> {
        let mut records = self
            .backend
            .list_history(self.limit, self.offset)
            .await
            .map_err(|err| {
                warn!("History refresh failed: {err}");
                history_error(err)
            })?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        info!("History refreshed with {} records", records.len());
        self.records = records;
        Ok(&self.records)
    }

    pub async fn delete_one(&mut self, id: &str) -> Result<&[HistoryRecord]> {
        self.backend.delete_record(id).await?;
        self.refresh().await
    }

    pub async fn clear_all(&mut self) -> Result<&[HistoryRecord]> {
        self.backend.clear_history().await?;
        self.refresh().await
    }
}

fn history_error(err: SightlineError) -> SightlineError {
    match err {
        SightlineError::HistoryLoad(_) => err,
        other => SightlineError::HistoryLoad(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    /// Backend that keeps records in memory, in insertion order.
    #[derive(Default)]
    struct MemoryHistory {
        records: Mutex<Vec<HistoryRecord>>,
        fail_list: AtomicBool,
    }

    impl MemoryHistory {
        fn seeded() -> Self {
            let record = |id: &str, hour: u32| HistoryRecord {
                id: id.into(),
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
                detections: Vec::new(),
                processed_image: None,
            };
            Self {
                records: Mutex::new(vec![record("old", 8), record("new", 12), record("mid", 10)]),
                fail_list: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl HistoryBackend for MemoryHistory {
        async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(SightlineError::Network("connection refused".into()));
            }
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn delete_record(&self, id: &str) -> Result<()> {
            self.records.lock().unwrap().retain(|record| record.id != id);
            Ok(())
        }

        async fn clear_history(&self) -> Result<()> {
            self.records.lock().unwrap().clear();
            Ok(())
        }
    }

    #[tokio::test]
    async fn refresh_sorts_most_recent_first() {
        let mut mirror = HistoryMirror::new(MemoryHistory::seeded(), 50);
        let ids: Vec<String> = mirror
            .refresh()
            .await
            .expect("refresh")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert!(mirror.get("mid").is_some());
    }

    #[tokio::test]
    async fn delete_one_resynchronises_from_backend() {
        let mut mirror = HistoryMirror::new(MemoryHistory::seeded(), 50);
        mirror.refresh().await.expect("refresh");
        let records = mirror.delete_one("mid").await.expect("delete");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.id != "mid"));
    }

    #[tokio::test]
    async fn clear_all_leaves_an_empty_history() {
        let mut mirror = HistoryMirror::new(MemoryHistory::seeded(), 50);
        mirror.refresh().await.expect("refresh");
        assert!(mirror.clear_all().await.expect("clear").is_empty());
        assert!(mirror.records().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_is_a_history_load_error_and_keeps_cache() {
        let backend = MemoryHistory::seeded();
        let mut mirror = HistoryMirror::new(backend, 50);
        mirror.refresh().await.expect("refresh");
        mirror.backend.fail_list.store(true, Ordering::SeqCst);

        let err = mirror.refresh().await.unwrap_err();
        assert_eq!(err.category(), "history");
        assert_eq!(mirror.records().len(), 3);
    }

    #[tokio::test]
    async fn limit_and_offset_are_forwarded() {
        let mut mirror = HistoryMirror::new(MemoryHistory::seeded(), 1).with_offset(1);
        let records = mirror.refresh().await.expect("refresh");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "new");
    }
}
