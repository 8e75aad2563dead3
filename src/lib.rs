//! SafetyAI vision backend.
//!
//! A camera risk-scoring service: frames are pulled from a camera, people are
//! detected, the frame is scored on lighting, crowd size and time of day, and the
//! annotated video plus the latest score are served over HTTP for a front end
//! to display and poll.
//!
//! # Module Structure
//!
//! - `frame`: per-iteration RGB pixel buffer
//! - `ingest`: camera sources (V4L2 devices, synthetic `stub://` sources)
//! - `camera`: process-wide camera ownership (start/stop/read)
//! - `detect`: person detectors (YOLO via tract, HOG + linear SVM) and selection
//! - `analysis`: risk signals, score and level
//! - `state`: latest analysis shared with HTTP readers
//! - `overlay`: boxes and summary text drawn on the frame
//! - `pipeline`: per-frame processing and multipart stream sessions
//! - `api`: HTTP routes
//! - `config`: `safetyd` configuration

use anyhow::Result;

pub mod analysis;
pub mod api;
pub mod camera;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod state;

pub use analysis::{AnalysisResult, CrowdDensity, Lighting, RiskLevel, TimeRisk};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use camera::{CameraManager, StartOutcome, StopOutcome};
pub use config::SafetydConfig;
pub use detect::{BoundingBox, DetectionSet, Detector, DetectorBackend, DetectorKind};
pub use frame::Frame;
pub use ingest::{CameraConfig, CameraSource};
pub use overlay::OverlayRenderer;
pub use pipeline::{Pipeline, StreamSession, StreamSettings};
pub use state::AnalysisBoard;

/// Assemble the pipeline described by `cfg`: select the detector, load the
/// overlay font and prepare (but do not open) the camera.
///
/// Fails up front when this build cannot drive the configured camera.
pub fn build_pipeline(cfg: &SafetydConfig) -> Result<Pipeline> {
    CameraSource::check_device(&cfg.camera.device)?;
    let detector = Detector::select(&detect::ModelAssets::new(&cfg.model_dir))?;
    let overlay = OverlayRenderer::load(cfg.font_path.as_deref())?;
    let camera = CameraManager::new(cfg.camera.clone());
    Ok(Pipeline::new(detector, overlay, camera, cfg.stream.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_models(dir: &std::path::Path) -> SafetydConfig {
        let mut cfg = SafetydConfig::default();
        cfg.model_dir = dir.to_path_buf();
        cfg
    }

    #[cfg(feature = "ingest-v4l2")]
    #[test]
    fn default_camera_device_is_accepted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = build_pipeline(&config_with_models(dir.path()))?;
        assert_eq!(pipeline.camera().config().device, "/dev/video0");
        assert!(!pipeline.camera().is_running());
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_camera_is_refused_without_v4l2() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = match build_pipeline(&config_with_models(dir.path())) {
            Ok(_) => panic!("device camera accepted without ingest-v4l2"),
            Err(err) => err,
        };
        assert!(format!("{:#}", err).contains("ingest-v4l2"));
        Ok(())
    }
}
