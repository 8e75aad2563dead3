use std::fmt;

use anyhow::Result;

use super::result::DetectionSet;
use crate::frame::Frame;

/// The two person-detection algorithms the service can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Neural network (YOLO family) inference.
    Yolo,
    /// Histogram-of-oriented-gradients sliding window with a linear SVM.
    Hog,
}

impl DetectorKind {
    /// Name reported on the status endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Yolo => "YOLO",
            DetectorKind::Hog => "HOG",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Person detector backend.
///
/// Implementations return only the "person" category, with boxes expressed in
/// the pixel space of the frame they were given, whatever resizing they do
/// internally.
pub trait DetectorBackend: Send {
    /// Which algorithm this backend runs.
    fn kind(&self) -> DetectorKind;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet>;

    /// Run once before the backend is put in service; an error rejects it.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
