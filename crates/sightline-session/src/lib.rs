//! Live-detection session: camera lifecycle plus the detection poll loop.
//!
//! The session moves through `Idle -> CameraActive -> Detecting`. While
//! detecting, a single task ticks at a fixed period and runs capture, encode,
//! detect and render to completion before the next tick is considered, so at
//! most one detect call is ever outstanding. Every start/stop bumps a
//! generation counter; a result is applied only if the generation that issued
//! it is still current.

mod config;
mod history;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Instant,
};

use chrono::Utc;
use sightline_bus::EventBus;
use sightline_capture::{encode_frame, Camera};
use sightline_client::{network_error, DetectionBackend};
use sightline_ops::TelemetryStore;
use sightline_overlay::{OverlayRenderer, OverlaySurface};
use sightline_types::{
    events::{DetectionEvent, EventKind, EventPayload, HistoryEvent, NotificationLevel, SystemEvent},
    session::{LiveSessionState, SessionPhase},
    telemetry::LatencySample,
    Result, SightlineError,
};
use tokio::{
    sync::watch,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub use config::SessionConfig;
pub use history::HistorySink;

#[derive(Default)]
struct Shared {
    generation: u64,
    state: LiveSessionState,
    overlay: OverlayRenderer,
    /// Dropping the sender stops the running loop at its next tick.
    stop_tx: Option<watch::Sender<()>>,
}

/// Handle to one live camera session. Clones share the same session.
pub struct LiveSession<C, B>
where
    C: Camera + ?Sized + 'static,
    B: DetectionBackend + 'static,
{
    camera: Arc<C>,
    backend: Arc<B>,
    bus: Option<Arc<dyn EventBus>>,
    history: Option<Arc<dyn HistorySink>>,
    telemetry: TelemetryStore,
    shared: Arc<Mutex<Shared>>,
    in_flight: Arc<AtomicUsize>,
    config: SessionConfig,
}

impl<C, B> Clone for LiveSession<C, B>
where
    C: Camera + ?Sized + 'static,
    B: DetectionBackend + 'static,
{
    fn clone(&self) -> Self {
        Self {
            camera: Arc::clone(&self.camera),
            backend: Arc::clone(&self.backend),
            bus: self.bus.clone(),
            history: self.history.clone(),
            telemetry: self.telemetry.clone(),
            shared: Arc::clone(&self.shared),
            in_flight: Arc::clone(&self.in_flight),
            config: self.config.clone(),
        }
    }
}

impl<C, B> LiveSession<C, B>
where
    C: Camera + ?Sized + 'static,
    B: DetectionBackend + 'static,
{
    pub fn new(camera: Arc<C>, backend: Arc<B>, config: SessionConfig) -> Self {
        Self {
            camera,
            backend,
            bus: None,
            history: None,
            telemetry: TelemetryStore::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryStore) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock()
            .map(|shared| shared.state.phase())
            .unwrap_or_default()
    }

    pub fn state(&self) -> LiveSessionState {
        self.lock()
            .map(|shared| shared.state.clone())
            .unwrap_or_default()
    }

    pub fn overlay(&self) -> OverlaySurface {
        self.lock()
            .map(|shared| shared.overlay.surface().clone())
            .unwrap_or_default()
    }

    /// Detect calls currently outstanding. Never more than one.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `Idle -> CameraActive`. On failure the session stays idle.
    pub async fn start_camera(&self) -> Result<()> {
        if self.phase().camera_active() {
            return Ok(());
        }
        let (width, height) = match self.camera.open().await {
            Ok(dims) => dims,
            Err(err) => {
                let err = match err {
                    SightlineError::CameraAccess(_) => err,
                    other => SightlineError::CameraAccess(other.to_string()),
                };
                warn!("Camera acquisition failed: {err}");
                self.notify_error("Camera access denied", &err).await;
                return Err(err);
            }
        };
        {
            let mut shared = self.lock()?;
            shared.generation += 1;
            shared.state.reset();
            shared.state.camera_active = true;
            shared.overlay.resize(width, height);
        }
        info!("Camera started at {}x{}", width, height);
        self.publish(SystemEvent::lifecycle(
            SessionPhase::CameraActive,
            format!("camera started at {width}x{height}"),
        ))
        .await;
        Ok(())
    }

    /// `CameraActive -> Detecting`.
    pub async fn start_detection(&self) -> Result<()> {
        let (generation, stop_rx) = {
            let mut shared = self.lock()?;
            match shared.state.phase() {
                SessionPhase::Idle => return Err(session_error("camera is not active")),
                SessionPhase::Detecting => return Ok(()),
                SessionPhase::CameraActive => {}
            }
            shared.generation += 1;
            shared.state.live_detection_enabled = true;
            let (stop_tx, stop_rx) = watch::channel(());
            shared.stop_tx = Some(stop_tx);
            (shared.generation, stop_rx)
        };

        let session = self.clone();
        tokio::spawn(async move { session.run_loop(generation, stop_rx).await });
        info!(
            "Live detection started (every {:?}, timeout {:?})",
            self.config.tick_interval, self.config.request_timeout
        );
        self.publish(SystemEvent::lifecycle(
            SessionPhase::Detecting,
            "live detection started",
        ))
        .await;
        Ok(())
    }

    /// `Detecting -> CameraActive`. A call already in flight may finish but
    /// its result is dropped.
    pub async fn stop_detection(&self) -> Result<()> {
        let stopped = {
            let mut shared = self.lock()?;
            halt_loop(&mut shared)
        };
        if stopped {
            info!("Live detection stopped");
            self.publish(SystemEvent::lifecycle(
                SessionPhase::CameraActive,
                "live detection stopped",
            ))
            .await;
        }
        Ok(())
    }

    /// Any phase `-> Idle`: stops detection, clears the overlay and the last
    /// batch, then releases the camera.
    pub async fn stop_camera(&self) -> Result<()> {
        let was_active = {
            let mut shared = self.lock()?;
            let was_active = shared.state.camera_active;
            halt_loop(&mut shared);
            shared.generation += 1;
            shared.state.reset();
            shared.overlay.clear();
            was_active
        };
        if !was_active {
            return Ok(());
        }
        self.camera.close().await?;
        info!("Camera stopped");
        self.publish(SystemEvent::lifecycle(SessionPhase::Idle, "camera stopped"))
            .await;
        Ok(())
    }

    async fn run_loop(self, generation: u64, mut stop: watch::Receiver<()>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Detection loop {} running", generation);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            if !self.is_current(generation) {
                break;
            }
            // A call from an earlier run can still be outstanding after a
            // quick stop/start; wait for it rather than overlap.
            let Some(_slot) = InFlightSlot::try_enter(&self.in_flight) else {
                debug!("Detect call still in flight, skipping tick");
                continue;
            };
            match timeout(self.config.request_timeout, self.tick(generation)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.record_failed_tick(generation, &err),
                Err(_) => self.record_failed_tick(
                    generation,
                    &network_error(format!(
                        "detection timed out after {:?}",
                        self.config.request_timeout
                    )),
                ),
            }
        }
        debug!("Detection loop {} finished", generation);
    }

    async fn tick(&self, generation: u64) -> Result<()> {
        let started = Instant::now();

        let frame = self.camera.capture_frame().await?;
        let payload = encode_frame(&frame, self.config.jpeg_quality)?;
        let capture_ms = elapsed_ms(started);

        let options = self
            .config
            .options
            .clone()
            .with_timestamp(Utc::now().timestamp_millis());
        let batch = self.backend.detect(&payload, &options).await?;
        let request_ms = elapsed_ms(started).saturating_sub(capture_ms);

        let count = batch.len();
        let labels: Vec<String> = batch.iter().map(|d| d.label.clone()).collect();
        let render_started = Instant::now();
        let applied = {
            let mut shared = self.lock()?;
            if shared.generation != generation || !shared.state.live_detection_enabled {
                false
            } else {
                if let Err(err) = shared.overlay.render(&batch) {
                    warn!("Overlay render failed: {err}");
                }
                shared.state.last_detection_batch = batch;
                shared.state.last_inference_latency_ms = Some(capture_ms + request_ms);
                true
            }
        };
        if !applied {
            debug!("Discarding detection result from stale run {}", generation);
            return Ok(());
        }

        let sample = LatencySample {
            capture_ms,
            request_ms,
            render_ms: elapsed_ms(render_started),
            total_ms: elapsed_ms(started),
            captured_at: frame.captured_at,
        };
        debug!(
            "Tick {}: {} detections in {}ms",
            generation, count, sample.total_ms
        );
        self.telemetry.record_latency(sample.clone()).await?;
        self.publish(SystemEvent::new(
            EventKind::Detection,
            EventPayload::Detection(DetectionEvent {
                count,
                labels,
                latency: Some(sample),
            }),
        ))
        .await;

        if self.config.persists_results() {
            if let Some(history) = &self.history {
                match history.detection_saved().await {
                    Ok(records) => {
                        self.publish(SystemEvent::new(
                            EventKind::History,
                            EventPayload::History(HistoryEvent { records }),
                        ))
                        .await
                    }
                    Err(err) => debug!("History refresh after live detection failed: {err}"),
                }
            }
        }
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock()
            .map(|shared| shared.generation == generation && shared.state.live_detection_enabled)
            .unwrap_or(false)
    }

    /// Tick failures stay out of the UI; they are only logged and counted.
    fn record_failed_tick(&self, generation: u64, err: &SightlineError) {
        debug!("Detection tick failed: {err}");
        if let Ok(mut shared) = self.lock() {
            if shared.generation == generation {
                shared.state.failed_ticks += 1;
            }
        }
    }

    async fn notify_error(&self, title: &str, err: &SightlineError) {
        self.publish(SystemEvent::notification(
            NotificationLevel::Error,
            title,
            err.to_string(),
        ))
        .await;
    }

    async fn publish(&self, event: SystemEvent) {
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(event.clone()).await {
                debug!("Event publish failed: {err}");
            }
        }
        let _ = self.telemetry.record_event(event).await;
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| session_error("session state lock poisoned"))
    }
}

fn halt_loop(shared: &mut Shared) -> bool {
    if !shared.state.live_detection_enabled {
        return false;
    }
    shared.state.live_detection_enabled = false;
    shared.generation += 1;
    shared.stop_tx.take();
    true
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// The single detect slot, held for as long as a call is outstanding.
struct InFlightSlot<'a>(&'a AtomicUsize);

impl<'a> InFlightSlot<'a> {
    fn try_enter(counter: &'a AtomicUsize) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn session_error(message: impl Into<String>) -> SightlineError {
    SightlineError::Session(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_holder_at_a_time() {
        let counter = AtomicUsize::new(0);
        let first = InFlightSlot::try_enter(&counter).expect("free slot");
        assert!(InFlightSlot::try_enter(&counter).is_none());
        drop(first);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(InFlightSlot::try_enter(&counter).is_some());
    }
}
