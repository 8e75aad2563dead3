//! safetyd - camera risk-scoring service
//!
//! This daemon:
//! 1. Selects the person detector (YOLO when model files load, HOG otherwise)
//! 2. Serves the annotated video feed and the latest risk analysis over HTTP
//! 3. Opens the camera on demand and releases it when asked or when idle

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use safety_vision::{
    api::{ApiConfig, ApiServer},
    config::SafetydConfig,
    DetectorKind,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve camera risk scores and the annotated video feed")]
struct Args {
    /// Config file (TOML when it ends in .toml, JSON otherwise).
    #[arg(long, env = "SAFETY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file and SAFETY_HTTP_ADDR.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SafetydConfig::load_with_file(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.http_addr = addr;
        cfg.validate()?;
    }

    let pipeline = Arc::new(safety_vision::build_pipeline(&cfg)?);
    let selection = pipeline.detector().selection();
    match selection.kind {
        DetectorKind::Yolo => log::info!("person detector: YOLO ({})", selection.label),
        DetectorKind::Hog => log::info!(
            "person detector: HOG fallback ({})",
            selection.fallback_reason.as_deref().unwrap_or("no reason recorded")
        ),
    }
    log::info!(
        "camera: {} ({}x{} @ {} fps), opened on first use",
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps
    );

    let api_config = ApiConfig {
        addr: cfg.http_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, pipeline.clone()).spawn()?;
    log::info!("safetyd listening on http://{}", api_handle.addr);
    log::info!("  video feed: /video_feed");
    log::info!("  analysis:   /analysis");
    log::info!("  status:     /status");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("safetyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping HTTP server...");
    api_handle.stop()?;
    pipeline.camera().stop()?;

    Ok(())
}
