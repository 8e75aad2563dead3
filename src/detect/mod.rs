//! Person detection.
//!
//! Two interchangeable backends implement [`DetectorBackend`]: a YOLO network run
//! through tract and a HOG + linear SVM sliding-window detector. One of them is
//! chosen at startup by [`Detector::select`] and kept for the process lifetime.

mod assets;
mod backend;
pub mod backends;
mod nms;
mod result;
mod select;

pub use assets::{person_class_index, ModelAssets, NetInput, NeuralAssets};
pub use backend::{DetectorBackend, DetectorKind};
pub use backends::{HogBackend, LinearSvm, YoloBackend};
pub use nms::non_max_suppression;
pub use result::{BoundingBox, DetectionSet, ScoredBox};
pub use select::{Detector, DetectorSelection};
