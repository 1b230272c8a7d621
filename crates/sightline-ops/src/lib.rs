//! Operational helpers: logging, telemetry, output directories.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use sightline_types::{
    config::OpsConfig,
    events::SystemEvent,
    telemetry::{LatencySample, LatencySummary},
    Result, SightlineError,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| SightlineError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| SightlineError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Events kept before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// In-memory record of recent session events plus a running latency summary.
///
/// Live sessions run indefinitely, so events live in a fixed-size ring and
/// latency samples are folded into the summary as they arrive.
#[derive(Clone)]
pub struct TelemetryStore {
    events: Arc<Mutex<VecDeque<SystemEvent>>>,
    latency: Arc<Mutex<LatencySummary>>,
    capacity: usize,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            latency: Arc::new(Mutex::new(LatencySummary::default())),
            capacity,
        }
    }

    pub async fn record_event(&self, event: SystemEvent) -> Result<()> {
        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    pub async fn record_latency(&self, sample: LatencySample) -> Result<()> {
        self.latency.lock().await.record(&sample);
        Ok(())
    }

    pub async fn snapshot_events(&self) -> Vec<SystemEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn summary(&self) -> LatencySummary {
        *self.latency.lock().await
    }

    /// Write the recorded events as pretty JSON.
    pub async fn export_events(&self, path: &Path) -> Result<()> {
        let events = self.snapshot_events().await;
        let doc = serde_json::to_vec_pretty(&events)
            .map_err(|err| SightlineError::Ops(format!("failed to serialise events: {err}")))?;
        tokio::fs::write(path, doc)
            .await
            .map_err(|err| SightlineError::Ops(format!("failed to write {}: {err}", path.display())))?;
        info!("Exported {} events to {:?}", events.len(), path);
        Ok(())
    }
}

pub fn ensure_output_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir)
        .map_err(|err| SightlineError::Ops(format!("failed to create output dir: {err}")))?;
    info!("Output directory ready at {:?}", dir);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sightline_types::{events::EventPayload, session::SessionPhase};

    fn sample(total_ms: u64) -> LatencySample {
        LatencySample {
            capture_ms: 1,
            request_ms: total_ms - 1,
            render_ms: 0,
            total_ms,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn summary_reports_mean_and_max() {
        let store = TelemetryStore::new();
        for ms in [10, 20, 60] {
            store.record_latency(sample(ms)).await.expect("record");
        }
        let summary = store.summary().await;
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.mean_ms, 30.0);
        assert_eq!(summary.max_ms, 60);
    }

    #[tokio::test]
    async fn event_log_stays_at_capacity() {
        let store = TelemetryStore::with_capacity(3);
        for i in 0..10 {
            store
                .record_event(SystemEvent::lifecycle(SessionPhase::Detecting, format!("tick {i}")))
                .await
                .expect("record");
            store.record_latency(sample(5)).await.expect("record");
        }
        let events = store.snapshot_events().await;
        assert_eq!(events.len(), 3);
        let details: Vec<_> = events
            .iter()
            .map(|event| match &event.payload {
                EventPayload::Lifecycle(lifecycle) => lifecycle.details.clone().unwrap_or_default(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(details, ["tick 7", "tick 8", "tick 9"]);
        assert_eq!(store.summary().await.samples, 10);
    }

    #[tokio::test]
    async fn events_export_as_json() {
        let store = TelemetryStore::new();
        store
            .record_event(SystemEvent::lifecycle(SessionPhase::CameraActive, "started"))
            .await
            .expect("record");
        let dir = ensure_output_dir(
            std::env::temp_dir()
                .join(format!("sightline-ops-{}", std::process::id()))
                .to_str()
                .expect("utf8 path"),
        )
        .expect("output dir");
        let path = dir.join("events.json");
        store.export_events(&path).await.expect("export");
        let text = std::fs::read_to_string(&path).expect("read export");
        assert!(text.contains("CameraActive"));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
