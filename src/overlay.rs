//! Frame annotation: person boxes plus a three-line risk summary.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::analysis::AnalysisResult;
use crate::detect::DetectionSet;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const SAFE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const SUMMARY_SCALE: f32 = 22.0;
/// Baselines of the summary lines, from the top-left corner.
const SUMMARY_X: i32 = 10;
const SUMMARY_BASELINES: [i32; 3] = [30, 60, 90];
/// Gap between a box's top edge and its label baseline.
const LABEL_GAP: i32 = 10;

/// Fonts tried when none is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Use the font at `font_path`, or the first installed candidate font.
    ///
    /// A configured font that cannot be loaded is an error. With no configured
    /// font and no candidate installed, boxes are still drawn but text is not.
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = font_path {
            return Ok(Self {
                font: Some(load_font(path)?),
            });
        }
        for candidate in FONT_CANDIDATES.iter().map(PathBuf::from) {
            if !candidate.is_file() {
                continue;
            }
            match load_font(&candidate) {
                Ok(font) => {
                    log::debug!("overlay font: {}", candidate.display());
                    return Ok(Self { font: Some(font) });
                }
                Err(err) => log::debug!("skipping font: {:#}", err),
            }
        }
        log::warn!("no overlay font found; frames will carry boxes only");
        Ok(Self::without_text())
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    /// Draw detections and the summary onto `frame`.
    pub fn render(&self, frame: &mut Frame, detections: &DetectionSet, analysis: &AnalysisResult) {
        let image = frame.image_mut();
        for bbox in detections.iter() {
            draw_thick_rect(image, bbox.x, bbox.y, bbox.width, bbox.height);
            self.draw_line(
                image,
                bbox.x,
                bbox.y - LABEL_GAP,
                LABEL_SCALE,
                BOX_COLOR,
                "Person",
            );
        }

        let level_color = if analysis.risk_level.is_safe() {
            SAFE_COLOR
        } else {
            ALERT_COLOR
        };
        let lines = [
            (
                format!("People Detected: {}", analysis.person_count),
                TEXT_COLOR,
            ),
            (format!("Risk Score: {}", analysis.risk_score), TEXT_COLOR),
            (
                format!("Risk Level: {}", analysis.risk_level.as_str().to_uppercase()),
                level_color,
            ),
        ];
        for ((text, color), baseline) in lines.iter().zip(SUMMARY_BASELINES) {
            self.draw_line(image, SUMMARY_X, baseline, SUMMARY_SCALE, *color, text);
        }
    }

    /// Draw `text` with its baseline at `baseline`.
    fn draw_line(
        &self,
        image: &mut RgbImage,
        x: i32,
        baseline: i32,
        scale: f32,
        color: Rgb<u8>,
        text: &str,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        // draw_text_mut positions the glyph box top; approximate the ascent.
        let top = baseline - (scale * 0.8) as i32;
        draw_text_mut(image, color, x, top, PxScale::from(scale), font, text);
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("invalid font file {}", path.display()))
}

fn draw_thick_rect(image: &mut RgbImage, x: i32, y: i32, width: u32, height: u32) {
    for inset in 0..BOX_THICKNESS {
        let w = width as i64 - 2 * inset as i64;
        let h = height as i64 - 2 * inset as i64;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x + inset, y + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
