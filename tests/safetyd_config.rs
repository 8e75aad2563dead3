use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use safety_vision::config::SafetydConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SAFETY_CONFIG",
        "SAFETY_HTTP_ADDR",
        "SAFETY_CAMERA_DEVICE",
        "SAFETY_MODEL_DIR",
        "SAFETY_FONT_PATH",
        "SAFETY_JPEG_QUALITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "http": { "addr": "127.0.0.1:8080" },
        "camera": { "device": "/dev/video2", "width": 1280, "height": 720, "fps": 15 },
        "detector": { "model_dir": "/opt/models" },
        "stream": { "jpeg_quality": 70, "release_on_disconnect": false }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SAFETY_CONFIG", file.path());
    std::env::set_var("SAFETY_CAMERA_DEVICE", "stub://lobby");
    std::env::set_var("SAFETY_JPEG_QUALITY", "85");

    let cfg = SafetydConfig::load().expect("load config");

    assert_eq!(cfg.http_addr, "127.0.0.1:8080");
    assert_eq!(cfg.camera.device, "stub://lobby");
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 720);
    assert_eq!(cfg.camera.fps, 15);
    assert_eq!(cfg.model_dir, PathBuf::from("/opt/models"));
    assert_eq!(cfg.font_path, None);
    assert_eq!(cfg.stream.jpeg_quality, 85);
    assert!(!cfg.stream.release_on_disconnect);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[http]
addr = "0.0.0.0:5050"

[overlay]
font_path = "/usr/share/fonts/custom.ttf"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = SafetydConfig::load_with_file(Some(file.path())).expect("load config");
    assert_eq!(cfg.http_addr, "0.0.0.0:5050");
    assert_eq!(cfg.font_path, Some(PathBuf::from("/usr/share/fonts/custom.ttf")));
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.stream.jpeg_quality, 95);

    clear_env();
}

#[test]
fn env_only_config_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SAFETY_HTTP_ADDR", "127.0.0.1:6000");
    std::env::set_var("SAFETY_MODEL_DIR", "/srv/models");
    std::env::set_var("SAFETY_FONT_PATH", "/tmp/font.ttf");

    let cfg = SafetydConfig::load().expect("load config");
    assert_eq!(cfg.http_addr, "127.0.0.1:6000");
    assert_eq!(cfg.model_dir, PathBuf::from("/srv/models"));
    assert_eq!(cfg.font_path, Some(PathBuf::from("/tmp/font.ttf")));
    assert_eq!(cfg.camera.width, 640);
    assert!(cfg.stream.release_on_disconnect);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SAFETY_JPEG_QUALITY", "0");
    assert!(SafetydConfig::load().is_err());
    std::env::set_var("SAFETY_JPEG_QUALITY", "loud");
    assert!(SafetydConfig::load().is_err());
    clear_env();

    std::env::set_var("SAFETY_HTTP_ADDR", "not-an-address");
    assert!(SafetydConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"camera": {"fps": 0}}"#).expect("write config");
    assert!(SafetydConfig::load_with_file(Some(file.path())).is_err());

    clear_env();
}
