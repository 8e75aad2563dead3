pub mod hog;
pub mod yolo;

pub use hog::{HogBackend, LinearSvm};
pub use yolo::YoloBackend;
