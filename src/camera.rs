//! Process-wide camera ownership.
//!
//! `CameraManager` holds at most one open [`CameraSource`]. Start is lazy and
//! idempotent, stop is idempotent, and both run under the manager's mutex so two
//! concurrent requests can never open a second handle or release one twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;
use crate::ingest::{CameraConfig, CameraSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// The held camera. `source` is `None` when the device could not be created;
/// the slot still counts as running so that the first read fails.
struct HeldCamera {
    source: Option<CameraSource>,
}

pub struct CameraManager {
    config: CameraConfig,
    slot: Mutex<Option<HeldCamera>>,
    opens: AtomicU64,
}

impl CameraManager {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
            opens: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Open the camera unless it is already held.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut slot = self.lock()?;
        if slot.is_some() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        *slot = Some(self.open());
        Ok(StartOutcome::Started)
    }

    /// Start for a stream that needs frames; same as `start`, kept separate for logs.
    pub fn ensure_started(&self) -> Result<StartOutcome> {
        let outcome = self.start()?;
        if outcome == StartOutcome::Started {
            log::debug!("camera opened on demand for a stream");
        }
        Ok(outcome)
    }

    /// Release the camera if held.
    pub fn stop(&self) -> Result<StopOutcome> {
        let held = self.lock()?.take();
        match held {
            Some(mut held) => {
                if let Some(source) = held.source.as_mut() {
                    source.release();
                }
                log::info!("camera {} released", self.config.device);
                Ok(StopOutcome::Stopped)
            }
            None => Ok(StopOutcome::AlreadyStopped),
        }
    }

    /// Read one frame from the held camera.
    ///
    /// Fails when no camera is held, when it failed to open, or when the device
    /// read fails.
    pub fn read_frame(&self) -> Result<Frame> {
        let mut slot = self.lock()?;
        let held = slot
            .as_mut()
            .ok_or_else(|| anyhow!("camera is not running"))?;
        let source = held
            .source
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} failed to open", self.config.device))?;
        source.next_frame()
    }

    pub fn is_running(&self) -> bool {
        self.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Number of times a device has been opened since startup.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    fn open(&self) -> HeldCamera {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let source = CameraSource::new(self.config.clone()).map(|mut source| {
            if let Err(err) = source.connect() {
                log::warn!("camera {} did not open: {:#}", self.config.device, err);
            }
            source
        });
        match source {
            Ok(source) => {
                if source.is_connected() {
                    log::info!(
                        "camera {} opened at {}x{} @ {} fps",
                        self.config.device,
                        self.config.width,
                        self.config.height,
                        self.config.fps
                    );
                }
                HeldCamera {
                    source: Some(source),
                }
            }
            Err(err) => {
                log::warn!("camera {} unavailable: {:#}", self.config.device, err);
                HeldCamera { source: None }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<HeldCamera>>> {
        self.slot
            .lock()
            .map_err(|_| anyhow!("camera lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(device: &str) -> CameraManager {
        CameraManager::new(CameraConfig {
            device: device.to_string(),
            width: 32,
            height: 24,
            fps: 30,
        })
    }

    #[test]
    fn start_is_idempotent() -> Result<()> {
        let camera = stub("stub://test");
        assert_eq!(camera.start()?, StartOutcome::Started);
        assert_eq!(camera.start()?, StartOutcome::AlreadyRunning);
        assert_eq!(camera.start()?, StartOutcome::AlreadyRunning);
        assert_eq!(camera.opens(), 1);
        assert!(camera.is_running());
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let camera = stub("stub://test");
        assert_eq!(camera.stop()?, StopOutcome::AlreadyStopped);
        camera.start()?;
        assert_eq!(camera.stop()?, StopOutcome::Stopped);
        assert_eq!(camera.stop()?, StopOutcome::AlreadyStopped);
        assert!(!camera.is_running());
        Ok(())
    }

    #[test]
    fn restart_opens_a_fresh_device() -> Result<()> {
        let camera = stub("stub://test?frames=1");
        camera.start()?;
        camera.read_frame()?;
        assert!(camera.read_frame().is_err());
        camera.stop()?;
        camera.start()?;
        assert!(camera.read_frame().is_ok());
        assert_eq!(camera.opens(), 2);
        Ok(())
    }

    #[test]
    fn reads_fail_when_stopped() {
        let camera = stub("stub://test");
        assert!(camera.read_frame().is_err());
    }

    #[test]
    fn failed_open_is_held_and_fails_on_read() -> Result<()> {
        let camera = stub("stub://test?bogus=1");
        assert_eq!(camera.start()?, StartOutcome::Started);
        assert!(camera.is_running());
        assert!(camera.read_frame().is_err());
        assert_eq!(camera.stop()?, StopOutcome::Stopped);
        Ok(())
    }

    #[test]
    fn outcomes_serialize_to_status_strings() -> Result<()> {
        assert_eq!(serde_json::to_string(&StartOutcome::Started)?, "\"started\"");
        assert_eq!(
            serde_json::to_string(&StartOutcome::AlreadyRunning)?,
            "\"already_running\""
        );
        assert_eq!(serde_json::to_string(&StopOutcome::Stopped)?, "\"stopped\"");
        assert_eq!(
            serde_json::to_string(&StopOutcome::AlreadyStopped)?,
            "\"already_stopped\""
        );
        Ok(())
    }
}
