use mockito::{Matcher, Server};
use serde_json::json;
use sightline_client::{
    DetectMode, DetectOptions, DetectionBackend, HistoryBackend, HttpDetectionClient, VideoResult,
};
use sightline_types::{
    config::BackendConfig, geometry::BoundingBox, vision::EncodedImage, SightlineError,
};

fn client_for(server: &Server) -> HttpDetectionClient {
    HttpDetectionClient::new(&BackendConfig {
        base_url: format!("{}/api", server.url()),
        request_timeout_ms: 2_000,
        history_limit: 50,
    })
    .expect("build client")
}

fn payload() -> EncodedImage {
    EncodedImage::jpeg(640, 480, vec![0xff, 0xd8, 0xff, 0xd9])
}

#[tokio::test]
async fn detect_posts_base64_and_thresholds() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/detect")
        .match_body(Matcher::PartialJson(json!({
            "image": "/9j/2Q==",
            "confidence_threshold": 0.5,
            "iou_threshold": 0.4
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "data": {
                    "detections": [{
                        "label": "bottle",
                        "confidence": 0.91,
                        "box": {"x": 50, "y": 60, "width": 40, "height": 120},
                        "class_id": 39
                    }],
                    "count": 1
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let batch = client_for(&server)
        .detect(&payload(), &DetectOptions::single_shot())
        .await
        .expect("detect");

    mock.assert_async().await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.source_size, Some((640, 480)));
    assert_eq!(batch.detections[0].tag_text(), "bottle 91.0%");
    assert_eq!(
        batch.detections[0].bbox,
        BoundingBox::from_xywh(50.0, 60.0, 40.0, 120.0)
    );
}

#[tokio::test]
async fn stream_mode_hits_stream_endpoint_with_timestamp() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/detect/stream")
        .match_body(Matcher::PartialJson(json!({
            "confidence_threshold": 0.3,
            "iou_threshold": 0.5,
            "timestamp": 1234
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "data": {"detections": [], "count": 0, "timestamp": 1234}}"#)
        .create_async()
        .await;

    let batch = client_for(&server)
        .detect(&payload(), &DetectOptions::streaming().with_timestamp(1234))
        .await
        .expect("stream detect");
    mock.assert_async().await;
    assert!(batch.is_empty());
}

#[tokio::test]
async fn with_history_mode_uses_persisting_endpoint() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/detect-history")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detections": [{"class_name": "can", "confidence": 0.8, "bbox": [1, 2, 11, 22]}], "processed_image": "Zm9v"}"#)
        .create_async()
        .await;

    let options = DetectOptions::streaming().with_mode(DetectMode::WithHistory);
    let batch = client_for(&server)
        .detect(&payload(), &options)
        .await
        .expect("detect with history");
    mock.assert_async().await;
    assert_eq!(batch.detections[0].bbox, BoundingBox::from_xywh(1.0, 2.0, 10.0, 20.0));
    assert_eq!(batch.processed_image.as_deref(), Some("Zm9v"));
}

#[tokio::test]
async fn failure_envelope_surfaces_as_backend_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/detect")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": false, "error": {"message": "No image data provided", "code": "ERROR_400"}}"#)
        .create_async()
        .await;

    let err = client_for(&server)
        .detect(&payload(), &DetectOptions::single_shot())
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::Backend { ref code, .. } if code == "ERROR_400"));
}

#[tokio::test]
async fn non_success_status_is_a_network_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/detect")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": false, "error": {"message": "Detection failed: boom", "code": "ERROR_500"}}"#)
        .create_async()
        .await;

    let err = client_for(&server)
        .detect(&payload(), &DetectOptions::single_shot())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "network");
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn invalid_thresholds_never_reach_the_network() {
    let server = Server::new_async().await;
    let err = client_for(&server)
        .detect(
            &payload(),
            &DetectOptions::single_shot().with_thresholds(2.0, 0.4),
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), "configuration");
}

#[tokio::test]
async fn health_reports_model_state() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "data": {"status": "healthy", "model_loaded": true, "message": "ready", "device": "cpu"}}"#)
        .create_async()
        .await;

    let health = client_for(&server).health().await.expect("health");
    assert!(health.is_ready());
    assert_eq!(health.device.as_deref(), Some("cpu"));
}

#[tokio::test]
async fn history_list_delete_and_clear() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", "/api/history")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("limit".into(), "50".into()),
            Matcher::UrlEncoded("offset".into(), "0".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"records": [
                {"id": "r1", "timestamp": 1714564800, "detections": []},
                {"id": 7, "timestamp": "2024-05-02T08:30:00Z", "detections": [
                    {"class_name": "bottle", "confidence": 0.6, "bbox": [0, 0, 5, 5]}
                ]}
            ]})
            .to_string(),
        )
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/api/history-delete")
        .match_query(Matcher::UrlEncoded("detection_id".into(), "r1".into()))
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"deleted": 1}}"#)
        .create_async()
        .await;
    let clear = server
        .mock("DELETE", "/api/history-delete")
        .match_query(Matcher::Missing)
        .match_body(Matcher::Json(json!({"clear_all": true})))
        .with_status(204)
        .create_async()
        .await;

    let client = client_for(&server);
    let records = client.list_history(50, 0).await.expect("list history");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].id, "7");
    assert_eq!(records[1].detections[0].label, "bottle");

    client.delete_record("r1").await.expect("delete");
    client.clear_history().await.expect("clear");

    list.assert_async().await;
    delete.assert_async().await;
    clear.assert_async().await;
}

#[tokio::test]
async fn video_upload_returns_processed_bytes_or_detections() {
    let dir = std::env::temp_dir().join(format!("sightline-video-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create dir");
    let video = dir.join("clip.mp4");
    std::fs::write(&video, b"fake video").expect("write video");

    let mut server = Server::new_async().await;
    let processed = server
        .mock("POST", "/api/video")
        .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
        .with_status(200)
        .with_header("content-type", "video/mp4")
        .with_body(b"processed".to_vec())
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let result = client.detect_video(&video).await.expect("video upload");
    processed.assert_async().await;
    assert_eq!(
        result,
        VideoResult::Processed {
            content_type: "video/mp4".into(),
            bytes: b"processed".to_vec(),
        }
    );

    processed.remove_async().await;
    server
        .mock("POST", "/api/video")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detections": [{"label": "cup", "confidence": 0.4, "box": {"x1": 0, "y1": 0, "x2": 4, "y2": 4}}]}"#)
        .create_async()
        .await;
    match client.detect_video(&video).await.expect("video detections") {
        VideoResult::Detections(batch) => assert_eq!(batch.len(), 1),
        other => panic!("expected detections, got {other:?}"),
    }
    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn unreadable_video_fails_locally_without_upload() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/api/video")
        .expect(0)
        .create_async()
        .await;

    let missing = std::env::temp_dir().join("sightline-no-such-clip.mp4");
    let err = client_for(&server).detect_video(&missing).await.unwrap_err();
    assert!(matches!(err, SightlineError::Capture(_)), "{err:?}");
    assert_eq!(err.category(), "capture");
    upload.assert_async().await;
}
