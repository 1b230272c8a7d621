use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use sightline_capture::{encode_frame, load_image_file};
use sightline_client::{
    DetectMode, DetectOptions, DetectionBackend, HttpDetectionClient, VideoResult,
};
use sightline_history::HistoryMirror;
use sightline_ops::ensure_output_dir;
use sightline_overlay::OverlayRenderer;
use sightline_types::{
    config::SightlineConfig,
    detection::{DetectionBatch, HistoryRecord},
    vision::{ImageFrame, ImagePayload},
};
use tracing::info;

pub struct DetectArgs {
    pub image: PathBuf,
    pub confidence: Option<f32>,
    pub iou: Option<f32>,
    pub save: bool,
    pub overlay: Option<PathBuf>,
}

pub async fn health(config: &SightlineConfig) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let status = client.health().await?;
    println!(
        "{} status={} model_loaded={} device={}",
        client.base_url(),
        if status.status.is_empty() { "unknown" } else { status.status.as_str() },
        status.model_loaded,
        status.device.as_deref().unwrap_or("-"),
    );
    if let Some(message) = &status.message {
        println!("{message}");
    }
    if !status.is_ready() {
        bail!("model not loaded on backend");
    }
    Ok(())
}

pub async fn model(config: &SightlineConfig) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let info = client.model_info().await?;
    println!(
        "model={} device={} loaded={} classes={}",
        info.model_path, info.device, info.model_loaded, info.num_classes
    );
    for (index, class) in info.classes.iter().enumerate() {
        println!("  {index:>3} {class}");
    }
    Ok(())
}

pub async fn detect(config: &SightlineConfig, args: DetectArgs) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let frame = load_image_file(&args.image)?;
    let payload = encode_frame(&frame, config.detection.jpeg_quality)?;

    let mode = if args.save {
        DetectMode::WithHistory
    } else {
        DetectMode::SingleShot
    };
    let defaults = DetectOptions::from_config(&config.detection, DetectMode::SingleShot);
    let options = DetectOptions::default()
        .with_mode(mode)
        .with_thresholds(
            args.confidence.unwrap_or(defaults.confidence_threshold),
            args.iou.unwrap_or(defaults.iou_threshold),
        );

    let batch = client.detect(&payload, &options).await?;
    print_batch(&batch);

    if let Some(path) = &args.overlay {
        save_overlay(&frame, &batch, path)?;
        println!("overlay written to {}", path.display());
    }
    if let Some(payload) = &batch.processed_image {
        let dir = ensure_output_dir(&config.ops.output_dir)?;
        let path = save_processed_image(payload, &dir, &processed_stem(&args.image)).await?;
        println!("processed image written to {}", path.display());
    }

    if args.save {
        let mut mirror = HistoryMirror::new(client, config.backend.history_limit);
        let records = mirror.refresh().await?;
        println!("history now holds {} record(s)", records.len());
    }
    Ok(())
}

pub async fn video(config: &SightlineConfig, file: &Path, output: Option<PathBuf>) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    match client.detect_video(file).await? {
        VideoResult::Processed {
            content_type,
            bytes,
        } => {
            let path = match output {
                Some(path) => path,
                None => {
                    let dir = ensure_output_dir(&config.ops.output_dir)?;
                    dir.join(processed_name(file))
                }
            };
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(content_type = %content_type, "Processed video saved");
            println!(
                "processed video ({content_type}, {} bytes) written to {}",
                bytes.len(),
                path.display()
            );
        }
        VideoResult::Detections(batch) => print_batch(&batch),
    }
    Ok(())
}

pub async fn history_list(config: &SightlineConfig, limit: Option<u32>, offset: u32) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let mut mirror = HistoryMirror::new(client, limit.unwrap_or(config.backend.history_limit))
        .with_offset(offset);
    let records = mirror.refresh().await?;
    if records.is_empty() {
        println!("no detection history");
    }
    for record in records {
        println!("{}", format_record(record));
    }
    Ok(())
}

pub async fn history_preview(
    config: &SightlineConfig,
    id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let mut mirror = HistoryMirror::new(client, config.backend.history_limit);
    mirror.refresh().await?;
    let Some(record) = mirror.get(id) else {
        bail!("no history record {id} in the latest {} entries", config.backend.history_limit);
    };
    let Some(payload) = &record.processed_image else {
        bail!("history record {id} has no processed image");
    };
    let dir = match output {
        Some(dir) => dir,
        None => ensure_output_dir(&config.ops.output_dir)?,
    };
    let path = save_processed_image(payload, &dir, &format!("history_{id}")).await?;
    println!("processed image for {id} written to {}", path.display());
    Ok(())
}

pub async fn history_delete(config: &SightlineConfig, id: &str) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let mut mirror = HistoryMirror::new(client, config.backend.history_limit);
    let remaining = mirror.delete_one(id).await?.len();
    println!("deleted {id}; {remaining} record(s) remain");
    Ok(())
}

pub async fn history_clear(config: &SightlineConfig) -> Result<()> {
    let client = HttpDetectionClient::new(&config.backend)?;
    let mut mirror = HistoryMirror::new(client, config.backend.history_limit);
    mirror.clear_all().await?;
    println!("history cleared");
    Ok(())
}

/// Draws the batch over a copy of `frame` and writes it as PNG.
pub fn save_overlay(frame: &ImageFrame, batch: &DetectionBatch, path: &Path) -> Result<()> {
    let mut renderer = OverlayRenderer::new(frame.width, frame.height);
    renderer.render_from(batch, batch.source_size.unwrap_or(frame.dimensions()))?;
    let mut canvas = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("frame buffer does not match its dimensions")?;
    renderer.surface().composite_onto(&mut canvas)?;
    canvas
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Decode a backend `processed_image` and write it as `<stem>.<ext>` in `dir`.
pub async fn save_processed_image(payload: &str, dir: &Path, stem: &str) -> Result<PathBuf> {
    let image = ImagePayload::decode(payload)?;
    let path = dir.join(format!("{stem}.{}", image.extension));
    tokio::fs::write(&path, &image.bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn print_batch(batch: &DetectionBatch) {
    if batch.is_empty() {
        println!("no objects detected");
        return;
    }
    for detection in batch.iter() {
        let bbox = &detection.bbox;
        println!(
            "{:<24} at ({:.0}, {:.0}) {:.0}x{:.0}",
            detection.tag_text(),
            bbox.x,
            bbox.y,
            bbox.width,
            bbox.height
        );
    }
}

fn format_record(record: &HistoryRecord) -> String {
    let labels: Vec<&str> = record
        .detections
        .iter()
        .map(|d| d.label.as_str())
        .collect();
    format!(
        "{}  {}  {} object(s) {}{}",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.detections.len(),
        labels.join(", "),
        if record.processed_image.is_some() { "  [preview]" } else { "" }
    )
}

fn processed_stem(file: &Path) -> String {
    let stem = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("video");
    format!("{stem}_processed")
}

fn processed_name(file: &Path) -> String {
    format!("{}.mp4", processed_stem(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sightline_types::{detection::Detection, geometry::BoundingBox};

    #[test]
    fn processed_name_keeps_the_stem() {
        assert_eq!(processed_name(Path::new("/tmp/clip.mov")), "clip_processed.mp4");
        assert_eq!(processed_name(Path::new("")), "video_processed.mp4");
    }

    #[tokio::test]
    async fn processed_image_is_written_with_sniffed_extension() {
        let dir = std::env::temp_dir().join(format!("sightline-processed-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = save_processed_image("data:image/jpeg;base64,/9j/2Q==", &dir, "frame_processed")
            .await
            .expect("save processed image");
        assert_eq!(path, dir.join("frame_processed.jpg"));
        assert_eq!(std::fs::read(&path).expect("read back"), vec![0xff, 0xd8, 0xff, 0xd9]);
        assert!(save_processed_image("%%%", &dir, "broken").await.is_err());
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn history_lines_mark_records_with_previews() {
        let mut record = HistoryRecord {
            id: "7".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            detections: Vec::new(),
            processed_image: None,
        };
        assert!(!format_record(&record).contains("[preview]"));
        record.processed_image = Some("/9j/2Q==".into());
        assert!(format_record(&record).ends_with("[preview]"));
    }

    #[test]
    fn history_lines_list_labels() {
        let record = HistoryRecord {
            id: "42".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            detections: vec![
                Detection::new("person", 0.9, BoundingBox::from_xywh(0.0, 0.0, 10.0, 10.0)),
                Detection::new("dog", 0.7, BoundingBox::from_xywh(5.0, 5.0, 10.0, 10.0)),
            ],
            processed_image: None,
        };
        assert_eq!(
            format_record(&record),
            "42  2024-03-01 12:30:00  2 object(s) person, dog"
        );
    }

    #[test]
    fn overlay_snapshot_is_written_as_png() {
        let frame = ImageFrame::from_rgba(32, 24, vec![0; 32 * 24 * 4]);
        let batch = DetectionBatch::new(vec![Detection::new(
            "cup",
            0.5,
            BoundingBox::from_xywh(4.0, 4.0, 12.0, 10.0),
        )]);
        let path = std::env::temp_dir().join(format!("sightline-overlay-{}.png", std::process::id()));
        save_overlay(&frame, &batch, &path).expect("save overlay");
        let written = image::open(&path).expect("reopen").to_rgba8();
        assert_eq!(written.dimensions(), (32, 24));
        assert_ne!(written.get_pixel(4, 4)[0], 0);
        let _ = std::fs::remove_file(path);
    }
}
