//! Frame ingestion.
//!
//! This module provides the camera device provider:
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Synthetic `stub://` cameras (always available)
//!
//! Every source produces `Frame` instances in packed RGB, whatever layout the
//! device delivers. Sources block on read; there is no frame-rate throttling
//! beyond what the device itself imposes.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod source;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use source::{CameraConfig, CameraSource};
