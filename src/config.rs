use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::ingest::CameraConfig;
use crate::pipeline::StreamSettings;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_MODEL_DIR: &str = ".";
const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SafetydConfigFile {
    http: Option<HttpConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HttpConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    release_on_disconnect: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SafetydConfig {
    pub http_addr: String,
    pub camera: CameraConfig,
    pub model_dir: PathBuf,
    /// Overlay font; common system fonts are probed when unset.
    pub font_path: Option<PathBuf>,
    pub stream: StreamSettings,
}

impl Default for SafetydConfig {
    fn default() -> Self {
        Self::from_file(SafetydConfigFile::default())
    }
}

impl SafetydConfig {
    /// Defaults, then the file named by `SAFETY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SAFETY_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_with_file(config_path.as_deref().map(Path::new))
    }

    /// Like [`load`](Self::load), with an explicit config file.
    pub fn load_with_file(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SafetydConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SafetydConfigFile) -> Self {
        let http_addr = file
            .http
            .and_then(|http| http.addr)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };
        let model_dir = file
            .detector
            .and_then(|detector| detector.model_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
        let font_path = file.overlay.and_then(|overlay| overlay.font_path);
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            release_on_disconnect: stream_file.release_on_disconnect.unwrap_or(true),
        };
        Self {
            http_addr,
            camera,
            model_dir,
            font_path,
            stream,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SAFETY_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http_addr = addr;
            }
        }
        if let Ok(device) = std::env::var("SAFETY_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(dir) = std::env::var("SAFETY_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("SAFETY_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(quality) = std::env::var("SAFETY_JPEG_QUALITY") {
            self.stream.jpeg_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("SAFETY_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.http_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("http addr '{}' is not a valid socket address", self.http_addr))?;
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be in 1..=100, got {}",
                self.stream.jpeg_quality
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SafetydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_service() {
        let cfg = SafetydConfig::default();
        assert_eq!(cfg.http_addr, "0.0.0.0:5000");
        assert_eq!(cfg.camera.device, "/dev/video0");
        assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 30));
        assert_eq!(cfg.model_dir, PathBuf::from("."));
        assert_eq!(cfg.font_path, None);
        assert_eq!(cfg.stream.jpeg_quality, 95);
        assert!(cfg.stream.release_on_disconnect);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = SafetydConfig::default();
        cfg.stream.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SafetydConfig::default();
        cfg.camera.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SafetydConfig::default();
        cfg.http_addr = "localhost".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_sections_are_optional() -> Result<()> {
        let file: SafetydConfigFile = toml::from_str("[camera]\nfps = 15\n")?;
        let cfg = SafetydConfig::from_file(file);
        assert_eq!(cfg.camera.fps, 15);
        assert_eq!(cfg.camera.width, 640);
        assert_eq!(cfg.http_addr, "0.0.0.0:5000");
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<SafetydConfigFile>(r#"{"camara": {}}"#).is_err());
    }
}
