//! Camera frame source.
//!
//! `CameraSource` is the camera device provider the pipeline consumes. It exposes
//! open (`connect`), read-one-frame (`next_frame`), release (`release`) and the
//! capture properties applied at open time (width, height, fps).
//!
//! Two backends:
//! - `stub://` URLs produce synthetic frames (always available, used by tests).
//! - Device paths (e.g. `/dev/video0`) use V4L2 (feature: ingest-v4l2).

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceV4l2Source;
use crate::frame::Frame;

/// Capture properties for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or synthetic URL ("stub://front").
    pub device: String,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested frame rate.
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// A single capture device handle.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(config)?),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceV4l2Source::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Self::check_device(&config.device)?;
            Err(anyhow!("camera device {} is not supported", config.device))
        }
    }

    /// Whether this build can drive `device`. Synthetic URLs always can;
    /// device paths need the ingest-v4l2 feature.
    pub fn check_device(device: &str) -> Result<()> {
        if device.starts_with("stub://") || cfg!(feature = "ingest-v4l2") {
            Ok(())
        } else {
            Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                device
            ))
        }
    }

    /// Open the device and apply capture properties.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame. Blocks until the device delivers one.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    /// Release the device. Safe to call more than once.
    pub fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_connected(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Synthetic camera.
///
/// `stub://<name>[?brightness=N][&frames=N]`: with `brightness` every frame is a
/// uniform gray of that level, otherwise a horizontal gradient. With `frames` the
/// source fails after that many reads, which ends any stream consuming it.
struct SyntheticSource {
    config: CameraConfig,
    brightness: Option<u8>,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    fn new(config: CameraConfig) -> Result<Self> {
        let mut brightness = None;
        let mut frame_limit = None;
        if let Some(query) = config.device.split_once('?').map(|(_, q)| q) {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
                match key {
                    "brightness" => {
                        brightness = Some(value.parse::<u8>().map_err(|_| {
                            anyhow!("stub brightness must be 0..=255, got '{}'", value)
                        })?)
                    }
                    "frames" => {
                        frame_limit = Some(value.parse::<u64>().map_err(|_| {
                            anyhow!("stub frames must be an integer, got '{}'", value)
                        })?)
                    }
                    other => return Err(anyhow!("unknown stub parameter '{}'", other)),
                }
            }
        }
        Ok(Self {
            config,
            brightness,
            frame_limit,
            frame_count: 0,
            connected: false,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "CameraSource: connected to {} ({}x{} @ {} fps, synthetic)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("camera {} not connected", self.config.device));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(anyhow!(
                "synthetic camera {} exhausted after {} frames",
                self.config.device,
                self.frame_count
            ));
        }
        self.frame_count += 1;

        let (width, height) = (self.config.width, self.config.height);
        match self.brightness {
            Some(level) => Ok(Frame::filled(
                width,
                height,
                [level, level, level],
                self.frame_count,
            )),
            None => {
                let mut pixels = Vec::with_capacity((width * height * 3) as usize);
                for _y in 0..height {
                    for x in 0..width {
                        let value = ((x as u64 * 255 / width.max(1) as u64
                            + self.frame_count)
                            % 256) as u8;
                        pixels.extend_from_slice(&[value, value, value]);
                    }
                }
                Frame::from_rgb(pixels, width, height, self.frame_count)
            }
        }
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("CameraSource: released {}", self.config.device);
        }
        self.connected = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
