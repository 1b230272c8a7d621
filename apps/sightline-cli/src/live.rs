use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::{bail, Result};
use clap::Args;
use futures::StreamExt;
use sightline_bus::{EventBus, LocalBus};
use sightline_capture::{camera_from_config, Camera};
use sightline_client::{DetectionBackend, HistoryBackend, HttpDetectionClient};
use sightline_history::HistoryMirror;
use sightline_ops::{ensure_output_dir, TelemetryStore};
use sightline_session::{LiveSession, SessionConfig};
use sightline_types::{
    config::{CameraSource, SightlineConfig},
    events::{EventPayload, SystemEvent},
    session::SessionPhase,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::{
    commands::save_overlay,
    ui::{self, UiCommand, UiMessage},
};

type Session = LiveSession<dyn Camera, HttpDetectionClient>;

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Detection period in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Stop after this many seconds (headless mode only).
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,
    /// Replay JPEG/PNG frames from this directory instead of the configured camera.
    #[arg(long)]
    frames_dir: Option<PathBuf>,
    /// Keep every live result in the backend history.
    #[arg(long)]
    persist: bool,
    /// Interactive terminal dashboard.
    #[arg(long)]
    tui: bool,
    /// Save the last overlay over a fresh frame when the run ends.
    #[arg(long)]
    snapshot: bool,
    /// Export every session event as JSON when the run ends.
    #[arg(long)]
    events: Option<PathBuf>,
}

pub async fn run(config: &SightlineConfig, args: LiveArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(ms) = args.interval_ms {
        config.detection.tick_interval_ms = ms;
    }
    if let Some(dir) = &args.frames_dir {
        config.camera.source = CameraSource::Directory;
        config.camera.frames_dir = Some(dir.display().to_string());
    }
    if args.persist {
        config.detection.persist_live_results = true;
    }
    config.validate()?;

    let client = HttpDetectionClient::new(&config.backend)?;
    match client.health().await {
        Ok(status) if !status.is_ready() => {
            bail!("backend at {} has no model loaded", client.base_url())
        }
        Ok(status) => info!(device = ?status.device, "Backend ready"),
        Err(err) => warn!("Health check failed, continuing: {err}"),
    }

    let camera = camera_from_config(&config.camera)?;
    let bus = Arc::new(LocalBus::default());
    let telemetry = TelemetryStore::new();
    let session_config = SessionConfig::from_config(&config);

    let mut session: Session = LiveSession::new(
        camera.clone(),
        Arc::new(client.clone()),
        session_config,
    )
    .with_bus(bus.clone())
    .with_telemetry(telemetry.clone());
    if config.detection.persist_live_results {
        let mirror = mount_history(client, config.backend.history_limit).await;
        session = session.with_history(mirror);
    }

    if args.tui {
        run_dashboard(&session, bus.as_ref(), &config).await?;
    } else {
        run_headless(&session, bus.as_ref(), Duration::from_secs(args.duration_secs)).await?;
    }

    if args.snapshot {
        snapshot(&session, camera.as_ref(), &config).await;
    }
    session.stop_camera().await?;
    if let Some(path) = &args.events {
        telemetry.export_events(path).await?;
    }

    let summary = telemetry.summary().await;
    println!(
        "{} detection(s), mean latency {:.1}ms, max {}ms, {} failed tick(s)",
        summary.samples,
        summary.mean_ms,
        summary.max_ms,
        session.state().failed_ticks
    );
    Ok(())
}

/// Mirror used as the session's history sink, loaded once up front.
async fn mount_history<H: HistoryBackend + 'static>(
    backend: H,
    limit: u32,
) -> Arc<Mutex<HistoryMirror<H>>> {
    let mut mirror = HistoryMirror::new(backend, limit);
    match mirror.refresh().await {
        Ok(records) => info!("History mounted with {} records", records.len()),
        Err(err) => warn!("Initial history load failed: {err}"),
    }
    Arc::new(Mutex::new(mirror))
}

async fn run_headless(session: &Session, bus: &LocalBus, duration: Duration) -> Result<()> {
    let mut events = bus.subscribe();
    session.start_camera().await?;
    session.start_detection().await?;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.next() => {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
        }
    }
    session.stop_detection().await?;
    Ok(())
}

async fn run_dashboard(session: &Session, bus: &LocalBus, config: &SightlineConfig) -> Result<()> {
    let (ui_tx, ui_rx) = std::sync::mpsc::channel();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let summary = format!(
        "{} every {}ms",
        config.backend.base_url, config.detection.tick_interval_ms
    );
    let ui_thread = thread::spawn(move || ui::run(ui_rx, cmd_tx, summary));

    let mut events = bus.subscribe();
    loop {
        tokio::select! {
            Some(event) = events.next() => {
                if ui_tx.send(UiMessage::Event(event)).is_err() {
                    break;
                }
            }
            command = cmd_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    UiCommand::Quit => break,
                    UiCommand::ToggleCamera => {
                        let outcome = if session.phase().camera_active() {
                            session.stop_camera().await
                        } else {
                            session.start_camera().await
                        };
                        // Camera errors already reach the UI as notifications.
                        if let Err(err) = outcome {
                            warn!("Camera toggle failed: {err}");
                        }
                    }
                    UiCommand::ToggleDetection => {
                        let outcome = match session.phase() {
                            SessionPhase::Detecting => session.stop_detection().await,
                            _ => session.start_detection().await,
                        };
                        if let Err(err) = outcome {
                            let _ = ui_tx.send(UiMessage::Notice(err.to_string()));
                        }
                    }
                }
            }
        }
    }

    let _ = ui_tx.send(UiMessage::Shutdown);
    drop(ui_tx);
    match tokio::task::spawn_blocking(move || ui_thread.join()).await {
        Ok(Ok(result)) => result,
        _ => bail!("dashboard thread panicked"),
    }
}

async fn snapshot(session: &Session, camera: &dyn Camera, config: &SightlineConfig) {
    if !camera.is_open() {
        return;
    }
    let outcome = async {
        let frame = camera.capture_frame().await?;
        let batch = session.state().last_detection_batch;
        let dir = ensure_output_dir(&config.ops.output_dir)?;
        let path = dir.join(format!(
            "snapshot_{}.png",
            frame.captured_at.format("%Y%m%d_%H%M%S")
        ));
        save_overlay(&frame, &batch, &path)?;
        anyhow::Ok(path)
    }
    .await;
    match outcome {
        Ok(path) => println!("snapshot written to {}", path.display()),
        Err(err) => warn!("Snapshot failed: {err:#}"),
    }
}

/// One console line per event worth showing outside the dashboard.
fn describe(event: &SystemEvent) -> Option<String> {
    let at = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        EventPayload::Detection(detection) => {
            let latency = detection
                .latency
                .as_ref()
                .map(|sample| format!(" in {}ms", sample.total_ms))
                .unwrap_or_default();
            Some(format!(
                "[{at}] {} object(s){latency}: {}",
                detection.count,
                detection.labels.join(", ")
            ))
        }
        EventPayload::Notification(note) => {
            Some(format!("[{at}] {}: {}", note.title, note.message))
        }
        EventPayload::History(history) => {
            Some(format!("[{at}] history holds {} record(s)", history.records))
        }
        EventPayload::Lifecycle(_) => None,
    }
}
