use std::sync::Mutex;

use anyhow::{anyhow, Result};

use super::assets::ModelAssets;
use super::backend::{DetectorBackend, DetectorKind};
use super::backends::{HogBackend, YoloBackend};
use super::result::DetectionSet;
use crate::frame::Frame;

/// Which backend was chosen at startup, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorSelection {
    pub kind: DetectorKind,
    /// Network or algorithm label (e.g. "yolov4-tiny", "hog").
    pub label: String,
    /// Set when the neural backend could not be used.
    pub fallback_reason: Option<String>,
}

/// The process-wide person detector.
///
/// Wrapped in a `Mutex` because `DetectorBackend::detect` takes `&mut self`; the
/// lock is held for one frame's detection only.
pub struct Detector {
    backend: Mutex<Box<dyn DetectorBackend>>,
    selection: DetectorSelection,
}

impl Detector {
    /// Pick the first loadable neural network in `assets`, else the HOG backend.
    ///
    /// The choice is final: a failed neural load is never retried. A neural
    /// candidate must also survive one warm-up inference to be chosen.
    pub fn select(assets: &ModelAssets) -> Result<Self> {
        let candidates = assets.neural_candidates();
        let mut failures = Vec::new();
        if candidates.is_empty() {
            failures.push(format!(
                "no neural model files in {}",
                assets.dir.display()
            ));
        } else {
            let names = assets.category_names();
            for candidate in candidates {
                let loaded = YoloBackend::load(&candidate, &names).and_then(|mut backend| {
                    backend.warm_up()?;
                    Ok(backend)
                });
                match loaded {
                    Ok(backend) => {
                        log::info!(
                            "loaded {} person detector from {}",
                            backend.label(),
                            candidate.weights.display()
                        );
                        let label = backend.label().to_string();
                        return Ok(Self {
                            backend: Mutex::new(Box::new(backend)),
                            selection: DetectorSelection {
                                kind: DetectorKind::Yolo,
                                label,
                                fallback_reason: None,
                            },
                        });
                    }
                    Err(err) => {
                        log::warn!("failed to load {}: {:#}", candidate.label, err);
                        failures.push(format!("{}: {:#}", candidate.label, err));
                    }
                }
            }
        }

        let reason = failures.join("; ");
        log::warn!("using HOG person detector: {}", reason);
        let hog = HogBackend::from_svm_path(assets.hog_svm_path().as_deref())?;
        Ok(Self {
            backend: Mutex::new(Box::new(hog)),
            selection: DetectorSelection {
                kind: DetectorKind::Hog,
                label: "hog".to_string(),
                fallback_reason: Some(reason),
            },
        })
    }

    /// Use a specific backend, bypassing asset discovery.
    pub fn with_backend(backend: Box<dyn DetectorBackend>) -> Self {
        let kind = backend.kind();
        Self {
            backend: Mutex::new(backend),
            selection: DetectorSelection {
                kind,
                label: kind.as_str().to_ascii_lowercase(),
                fallback_reason: None,
            },
        }
    }

    pub fn kind(&self) -> DetectorKind {
        self.selection.kind
    }

    pub fn selection(&self) -> &DetectorSelection {
        &self.selection
    }

    pub fn detect(&self, frame: &Frame) -> Result<DetectionSet> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        backend.detect(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::hog::silhouette_window;
    use crate::detect::BoundingBox;
    use image::{Rgb, RgbImage};

    #[test]
    fn empty_model_dir_selects_hog_with_reason() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let detector = Detector::select(&ModelAssets::new(dir.path()))?;
        assert_eq!(detector.kind(), DetectorKind::Hog);
        let reason = detector
            .selection()
            .fallback_reason
            .clone()
            .unwrap_or_default();
        assert!(reason.contains("no neural model files"));
        Ok(())
    }

    #[test]
    fn corrupt_weights_fall_back_to_hog() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("yolov4-tiny.cfg"), "[net]\nwidth=416\nheight=416\n")?;
        std::fs::write(dir.path().join("yolov4-tiny.onnx"), b"not an onnx model")?;

        let detector = Detector::select(&ModelAssets::new(dir.path()))?;
        assert_eq!(detector.kind(), DetectorKind::Hog);
        let reason = detector
            .selection()
            .fallback_reason
            .clone()
            .unwrap_or_default();
        assert!(reason.starts_with("yolov4-tiny:"));
        Ok(())
    }

    #[test]
    fn hog_fallback_finds_an_upright_figure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let detector = Detector::select(&ModelAssets::new(dir.path()))?;
        assert_eq!(detector.kind(), DetectorKind::Hog);

        // The silhouette at twice window size, placed so that after halving and
        // padding it lines up with a window on the first pyramid level.
        let figure = silhouette_window();
        let origin = 40;
        let image = RgbImage::from_fn(320, 320, |x, y| {
            let inside = (origin..origin + 2 * figure.width()).contains(&x)
                && (origin..origin + 2 * figure.height()).contains(&y);
            let level = if inside {
                figure.get_pixel((x - origin) / 2, (y - origin) / 2).0[0]
            } else {
                200
            };
            Rgb([level, level, level])
        });
        let frame = Frame::new(image, 1);

        // Whatever survives merging overlaps the aligned window.
        const MERGE_OVERLAP: f32 = 0.4;
        let detections = detector.detect(&frame)?;
        let expected = BoundingBox::new(40, 40, 128, 256);
        assert!(detections.person_count() >= 1);
        assert!(detections.iter().any(|b| b.iou(&expected) > MERGE_OVERLAP));

        let empty = Frame::filled(320, 320, [200, 200, 200], 2);
        assert_eq!(detector.detect(&empty)?.person_count(), 0);
        Ok(())
    }

    #[test]
    fn explicit_backend_reports_its_kind() -> Result<()> {
        let detector = Detector::with_backend(Box::new(HogBackend::from_svm_path(None)?));
        assert_eq!(detector.kind(), DetectorKind::Hog);
        assert_eq!(detector.selection().fallback_reason, None);
        let frame = Frame::filled(64, 64, [0, 0, 0], 1);
        assert_eq!(detector.detect(&frame)?.person_count(), 0);
        Ok(())
    }
}
