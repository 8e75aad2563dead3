use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use safety_vision::api::{ApiConfig, ApiHandle, ApiServer};
use safety_vision::config::SafetydConfig;
use safety_vision::Pipeline;

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((headers, response[split..].to_vec()))
}

struct TestApi {
    _models: tempfile::TempDir,
    pipeline: Arc<Pipeline>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(camera_device: &str) -> Result<Self> {
        let models = tempdir()?;
        let mut cfg = SafetydConfig::default();
        cfg.model_dir = models.path().to_path_buf();
        cfg.camera.device = camera_device.to_string();
        cfg.camera.width = 64;
        cfg.camera.height = 48;
        let pipeline = Arc::new(safety_vision::build_pipeline(&cfg)?);

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let api_handle = ApiServer::new(api_config, pipeline.clone()).spawn()?;

        Ok(Self {
            _models: models,
            pipeline,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(&self, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn get_json(&self, path: &str) -> Result<(String, Value)> {
        let (headers, body) = self.request("GET", path)?;
        Ok((headers, serde_json::from_slice(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn status_reports_hog_when_model_files_are_absent() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    let (headers, body) = api.get_json("/status")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(body["status"], "running");
    assert_eq!(body["model"], "HOG");
    assert!(body["fallbackReason"].is_string());

    Ok(())
}

#[test]
fn start_camera_is_idempotent() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    let (_, first) = api.get_json("/start_camera")?;
    assert_eq!(first["status"], "started");
    let (_, second) = api.get_json("/start_camera")?;
    assert_eq!(second["status"], "already_running");
    assert_eq!(api.pipeline.camera().opens(), 1);

    Ok(())
}

#[test]
fn stop_camera_is_idempotent() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    let (_, before) = api.get_json("/stop_camera")?;
    assert_eq!(before["status"], "already_stopped");
    api.get_json("/start_camera")?;
    let (_, first) = api.get_json("/stop_camera")?;
    assert_eq!(first["status"], "stopped");
    let (_, second) = api.get_json("/stop_camera")?;
    assert_eq!(second["status"], "already_stopped");

    Ok(())
}

#[test]
fn analysis_starts_with_the_initial_result() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    let (headers, body) = api.get_json("/analysis")?;
    assert!(headers.contains("application/json"));
    assert_eq!(body["riskScore"], 0);
    assert_eq!(body["riskLevel"], "safe");
    assert_eq!(body["personCount"], 0);
    assert_eq!(body["movementPattern"], "normal");
    for key in ["lighting", "crowdDensity", "timeRisk", "timestamp"] {
        assert!(body[key].is_string(), "missing {key}");
    }

    Ok(())
}

#[test]
fn video_feed_streams_jpeg_parts_and_publishes_analysis() -> Result<()> {
    let api = TestApi::new("stub://front?brightness=30&frames=2")?;

    let (headers, body) = api.request("GET", "/video_feed")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));

    let part_header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let parts = body
        .windows(part_header.len())
        .filter(|w| *w == part_header)
        .count();
    assert_eq!(parts, 2);
    assert!(body.starts_with(part_header));
    assert_eq!(&body[part_header.len()..part_header.len() + 2], &[0xFF, 0xD8]);

    let (_, analysis) = api.get_json("/analysis")?;
    assert_eq!(analysis["lighting"], "poor");
    assert_eq!(analysis["crowdDensity"], "isolated");
    assert_eq!(analysis["personCount"], 0);

    // the stream was the only user, so the camera was released with it
    let (_, stop) = api.get_json("/stop_camera")?;
    assert_eq!(stop["status"], "already_stopped");

    Ok(())
}

#[test]
fn stalled_stream_client_releases_the_camera() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    // The client asks for the feed and then never reads; once the socket
    // buffers fill, the server's writes time out and the stream ends.
    let mut client = TcpStream::connect(api.handle().addr)?;
    client.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let deadline = Instant::now() + Duration::from_secs(90);
    while Instant::now() < deadline {
        if api.pipeline.camera().opens() > 0 && api.pipeline.live_streams() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(api.pipeline.camera().opens(), 1);
    assert_eq!(api.pipeline.live_streams(), 0);
    assert!(!api.pipeline.camera().is_running());

    drop(client);
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new("stub://front")?;

    let (headers, _) = api.request("GET", "/nope")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.request("POST", "/start_camera")?;
    assert!(headers.contains("405 Method Not Allowed"));
    assert!(!api.pipeline.camera().is_running());

    let (headers, _) = api.request("OPTIONS", "/analysis")?;
    assert!(headers.contains("204 No Content"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert!(headers.contains("Access-Control-Allow-Methods: GET, OPTIONS"));

    Ok(())
}
