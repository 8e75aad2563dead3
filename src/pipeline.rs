//! Streaming pipeline.
//!
//! Each `/video_feed` client drives its own [`StreamSession`]. One iteration
//! reads a frame from the shared camera, detects people, scores the frame,
//! draws the overlay, publishes the score to the [`AnalysisBoard`], encodes the
//! frame as JPEG and wraps it as one multipart part.
//!
//! A session ends when the camera read fails, when it is cancelled (client
//! gone) or when the pipeline shuts down. When the last live session ends the
//! camera is released if a stream opened it, unless `release_on_disconnect` is
//! off. A camera started through `/start_camera` stays up.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;

use crate::analysis::{self, AnalysisResult};
use crate::camera::{CameraManager, StartOutcome};
use crate::detect::Detector;
use crate::frame::Frame;
use crate::overlay::OverlayRenderer;
use crate::state::AnalysisBoard;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Clone, Debug)]
pub struct StreamSettings {
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Release the camera when the last stream ends.
    pub release_on_disconnect: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            release_on_disconnect: true,
        }
    }
}

pub struct Pipeline {
    detector: Detector,
    overlay: OverlayRenderer,
    board: AnalysisBoard,
    camera: CameraManager,
    settings: StreamSettings,
    streams: Mutex<StreamCount>,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct StreamCount {
    live: usize,
    /// A stream performed the camera's current start.
    opened_camera: bool,
}

impl Pipeline {
    pub fn new(
        detector: Detector,
        overlay: OverlayRenderer,
        camera: CameraManager,
        settings: StreamSettings,
    ) -> Self {
        Self {
            detector,
            overlay,
            board: AnalysisBoard::new(),
            camera,
            settings,
            streams: Mutex::new(StreamCount::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn board(&self) -> &AnalysisBoard {
        &self.board
    }

    pub fn camera(&self) -> &CameraManager {
        &self.camera
    }

    /// Number of `/video_feed` sessions currently producing.
    pub fn live_streams(&self) -> usize {
        self.streams.lock().map(|count| count.live).unwrap_or(0)
    }

    /// Stop every session at its next iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Detect, score, annotate and publish one frame.
    pub fn process_frame(&self, frame: &mut Frame, now: DateTime<Local>) -> Result<AnalysisResult> {
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("detection failed on frame {}", frame.sequence))?;
        let result = analysis::analyze(frame, &detections, now);
        self.overlay.render(frame, &detections, &result);
        self.board.publish(result.clone());
        Ok(result)
    }

    /// Start a stream, opening the camera if needed.
    pub fn open_stream(self: &Arc<Self>) -> Result<StreamSession> {
        if self.is_shutting_down() {
            return Err(anyhow!("pipeline is shutting down"));
        }
        let mut count = self
            .streams
            .lock()
            .map_err(|_| anyhow!("stream count lock poisoned"))?;
        if self.camera.ensure_started()? == StartOutcome::Started {
            count.opened_camera = true;
        }
        count.live += 1;
        log::info!("stream opened ({} live)", count.live);
        Ok(StreamSession {
            pipeline: Arc::clone(self),
            cancelled: Arc::new(AtomicBool::new(false)),
            parts: 0,
        })
    }

    fn close_stream(&self, parts: u64) {
        let Ok(mut count) = self.streams.lock() else {
            log::error!("stream count lock poisoned; camera left as is");
            return;
        };
        count.live = count.live.saturating_sub(1);
        log::info!("stream closed after {} frames ({} live)", parts, count.live);
        if count.live > 0 {
            return;
        }
        if std::mem::take(&mut count.opened_camera) && self.settings.release_on_disconnect {
            if let Err(err) = self.camera.stop() {
                log::warn!("failed to release camera after last stream: {:#}", err);
            }
        }
    }

    fn next_part(&self, sequence_hint: u64) -> Option<Vec<u8>> {
        let mut frame = match self.camera.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::info!("stream ended: {:#}", err);
                return None;
            }
        };
        let produced = self
            .process_frame(&mut frame, Local::now())
            .and_then(|_| encode_jpeg(&frame, self.settings.jpeg_quality));
        match produced {
            Ok(jpeg) => Some(multipart_part(&jpeg)),
            Err(err) => {
                log::warn!("stream ended at part {}: {:#}", sequence_hint, err);
                None
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector().kind())
            .field("live_streams", &self.live_streams())
            .finish()
    }
}

/// Cancels a [`StreamSession`] from another thread.
#[derive(Clone, Debug)]
pub struct StreamCancel(Arc<AtomicBool>);

impl StreamCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One client's live sequence of multipart parts.
pub struct StreamSession {
    pipeline: Arc<Pipeline>,
    cancelled: Arc<AtomicBool>,
    parts: u64,
}

impl StreamSession {
    pub fn cancel_handle(&self) -> StreamCancel {
        StreamCancel(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.pipeline.is_shutting_down()
    }

    pub fn parts_sent(&self) -> u64 {
        self.parts
    }
}

impl Iterator for StreamSession {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.is_cancelled() {
            return None;
        }
        let part = self.pipeline.next_part(self.parts + 1)?;
        self.parts += 1;
        Some(part)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.pipeline.close_stream(self.parts);
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(frame.image())
        .context("JPEG encoding failed")?;
    Ok(buf)
}

/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MULTIPART_BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}
