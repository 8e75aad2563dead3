//! Classical person detector.
//!
//! Dalal–Triggs style: HOG descriptors (`imageproc::hog`) over a 64×128 sliding
//! window, scored by a linear SVM, across an image pyramid. The frame is halved
//! before scanning for speed; every hit is mapped back to original-frame pixels.
//!
//! Coefficients come from `hog_people.svm` when installed, else from the
//! built-in upright-silhouette model.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::hog::{hog, HogOptions, HogSpec};

use crate::detect::backend::{DetectorBackend, DetectorKind};
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, DetectionSet, ScoredBox};
use crate::frame::Frame;

/// Factor the frame is resized by before scanning.
pub const DOWNSAMPLE: f32 = 0.5;
/// Detection window, in pixels.
pub const WINDOW_WIDTH: u32 = 64;
pub const WINDOW_HEIGHT: u32 = 128;
/// Window stride, in pixels.
pub const WINDOW_STRIDE: u32 = 8;
/// Border added around the scanned image, in pixels.
pub const PADDING: u32 = 4;
/// Ratio between successive pyramid levels.
pub const SCALE_STEP: f32 = 1.05;
/// SVM margin a window must exceed to count as a hit.
pub const HIT_THRESHOLD: f32 = 0.0;
/// Overlap above which hits from neighbouring windows or levels are merged.
const MERGE_IOU_THRESHOLD: f32 = 0.4;

fn window_options() -> HogOptions {
    // 8px cells, 2×2-cell blocks, one-cell block stride, 9 unsigned bins.
    HogOptions::new(9, false, 8, 2, 1)
}

/// Linear SVM over window descriptors: `w · x + b`.
#[derive(Clone, Debug)]
pub struct LinearSvm {
    weights: Vec<f32>,
    bias: f32,
}

impl LinearSvm {
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self> {
        let expected = descriptor_length()?;
        if weights.len() != expected {
            return Err(anyhow!(
                "SVM has {} weights, the window descriptor has {}",
                weights.len(),
                expected
            ));
        }
        Ok(Self { weights, bias })
    }

    /// Whitespace separated floats: the weights followed by the bias.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read SVM coefficients {}", path.display()))?;
        let mut values = raw
            .split_whitespace()
            .map(|v| {
                v.parse::<f32>()
                    .map_err(|_| anyhow!("invalid SVM coefficient '{}'", v))
            })
            .collect::<Result<Vec<f32>>>()?;
        let bias = values
            .pop()
            .ok_or_else(|| anyhow!("SVM coefficients file {} is empty", path.display()))?;
        Self::new(values, bias)
            .with_context(|| format!("invalid SVM coefficients {}", path.display()))
    }

    pub fn score(&self, descriptor: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(descriptor)
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias
    }
}

fn descriptor_length() -> Result<usize> {
    let spec = HogSpec::from_options(WINDOW_WIDTH, WINDOW_HEIGHT, window_options())
        .map_err(|err| anyhow!("invalid HOG window: {}", err))?;
    Ok(spec.descriptor_length())
}

fn window_descriptor(window: &GrayImage) -> Result<Vec<f32>> {
    hog(window, window_options()).map_err(|err| anyhow!("HOG descriptor failed: {}", err))
}

const FIGURE_LEVEL: u8 = 40;
const GROUND_LEVEL: u8 = 200;

/// Upright figure centred in a detection window: head, torso and two legs,
/// dark on a light ground.
pub(crate) fn silhouette_window() -> GrayImage {
    GrayImage::from_fn(WINDOW_WIDTH, WINDOW_HEIGHT, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let head = (x - 32).pow(2) * 81 + (y - 20).pow(2) * 49 <= 49 * 81;
        let torso = (20..44).contains(&x) && (28..76).contains(&y);
        let legs = (76..116).contains(&y) && ((20..30).contains(&x) || (34..44).contains(&x));
        if head || torso || legs {
            Luma([FIGURE_LEVEL])
        } else {
            Luma([GROUND_LEVEL])
        }
    })
}

/// Windows the built-in model must reject: empty ground, a horizontal ramp,
/// a wide bar and a checkerboard.
pub(crate) fn background_windows() -> Vec<GrayImage> {
    vec![
        GrayImage::from_pixel(WINDOW_WIDTH, WINDOW_HEIGHT, Luma([GROUND_LEVEL])),
        GrayImage::from_fn(WINDOW_WIDTH, WINDOW_HEIGHT, |x, _| Luma([(x * 4) as u8])),
        GrayImage::from_fn(WINDOW_WIDTH, WINDOW_HEIGHT, |x, y| {
            if (56..72).contains(&y) && (4..60).contains(&x) {
                Luma([FIGURE_LEVEL])
            } else {
                Luma([GROUND_LEVEL])
            }
        }),
        GrayImage::from_fn(WINDOW_WIDTH, WINDOW_HEIGHT, |x, y| {
            if (x / 16 + y / 16) % 2 == 0 {
                Luma([FIGURE_LEVEL])
            } else {
                Luma([GROUND_LEVEL])
            }
        }),
    ]
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl LinearSvm {
    /// Built-in coefficients used when no `hog_people.svm` is installed.
    ///
    /// The weights are the silhouette descriptor minus the mean background
    /// descriptor; the bias puts the decision boundary halfway between the
    /// silhouette's score and the best-scoring background.
    pub fn upright_silhouette() -> Result<Self> {
        let figure = window_descriptor(&silhouette_window())?;
        let backgrounds = background_windows()
            .iter()
            .map(window_descriptor)
            .collect::<Result<Vec<_>>>()?;

        let mut mean = vec![0.0_f32; figure.len()];
        for descriptor in &backgrounds {
            for (m, v) in mean.iter_mut().zip(descriptor) {
                *m += v / backgrounds.len() as f32;
            }
        }
        let weights: Vec<f32> = figure.iter().zip(&mean).map(|(f, m)| f - m).collect();

        let figure_score = dot(&weights, &figure);
        let background_score = backgrounds
            .iter()
            .map(|descriptor| dot(&weights, descriptor))
            .fold(0.0_f32, f32::max);
        if figure_score <= background_score {
            return Err(anyhow!(
                "silhouette model does not separate its templates ({} <= {})",
                figure_score,
                background_score
            ));
        }
        Self::new(weights, -(figure_score + background_score) / 2.0)
    }
}

/// HOG sliding-window backend.
pub struct HogBackend {
    svm: LinearSvm,
}

impl HogBackend {
    pub fn new(svm: LinearSvm) -> Self {
        Self { svm }
    }

    /// Coefficients from `path` when given and valid, the built-in silhouette
    /// model otherwise.
    pub fn from_svm_path(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            match LinearSvm::load(path) {
                Ok(svm) => {
                    log::info!("HOG detector coefficients loaded from {}", path.display());
                    return Ok(Self::new(svm));
                }
                Err(err) => log::warn!("HOG detector coefficients unusable: {:#}", err),
            }
        }
        log::info!("HOG detector using the built-in upright silhouette model");
        Ok(Self::new(LinearSvm::upright_silhouette()?))
    }

    /// Scan a grayscale image; boxes are in that image's pixels.
    fn scan(&self, gray: &GrayImage) -> Result<Vec<ScoredBox>> {
        let padded = pad_replicate(gray, PADDING);
        let mut hits = Vec::new();
        let mut level_scale = 1.0_f32;
        loop {
            let level_w = (padded.width() as f32 / level_scale).round() as u32;
            let level_h = (padded.height() as f32 / level_scale).round() as u32;
            if level_w < WINDOW_WIDTH || level_h < WINDOW_HEIGHT {
                break;
            }
            let level = if level_scale == 1.0 {
                padded.clone()
            } else {
                imageops::resize(&padded, level_w, level_h, FilterType::Triangle)
            };

            let mut y = 0;
            while y + WINDOW_HEIGHT <= level_h {
                let mut x = 0;
                while x + WINDOW_WIDTH <= level_w {
                    let window =
                        imageops::crop_imm(&level, x, y, WINDOW_WIDTH, WINDOW_HEIGHT).to_image();
                    let margin = self.svm.score(&window_descriptor(&window)?);
                    if margin > HIT_THRESHOLD {
                        hits.push(ScoredBox {
                            bbox: BoundingBox::new(
                                (x as f32 * level_scale) as i32 - PADDING as i32,
                                (y as f32 * level_scale) as i32 - PADDING as i32,
                                (WINDOW_WIDTH as f32 * level_scale) as u32,
                                (WINDOW_HEIGHT as f32 * level_scale) as u32,
                            ),
                            confidence: margin,
                        });
                    }
                    x += WINDOW_STRIDE;
                }
                y += WINDOW_STRIDE;
            }
            level_scale *= SCALE_STEP;
        }
        Ok(non_max_suppression(&hits, HIT_THRESHOLD, MERGE_IOU_THRESHOLD))
    }
}

impl DetectorBackend for HogBackend {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Hog
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
        let small_w = ((frame.width() as f32 * DOWNSAMPLE).round() as u32).max(1);
        let small_h = ((frame.height() as f32 * DOWNSAMPLE).round() as u32).max(1);
        let small = imageops::resize(frame.image(), small_w, small_h, FilterType::Triangle);
        let gray = imageops::grayscale(&small);

        let hits = self.scan(&gray)?;
        Ok(DetectionSet::new(to_original_space(
            hits.into_iter().map(|hit| hit.bbox),
            DOWNSAMPLE,
        )))
    }
}

/// Map boxes found in the downsampled frame back to original-frame pixels.
pub fn to_original_space(
    boxes: impl IntoIterator<Item = BoundingBox>,
    scale: f32,
) -> Vec<BoundingBox> {
    boxes.into_iter().map(|b| b.unscale(scale)).collect()
}

/// Copy of `image` with a `pad`-pixel border replicating the edge pixels.
fn pad_replicate(image: &GrayImage, pad: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    GrayImage::from_fn(w + 2 * pad, h + 2 * pad, |x, y| {
        let sx = x.saturating_sub(pad).min(w.saturating_sub(1));
        let sy = y.saturating_sub(pad).min(h.saturating_sub(1));
        if w == 0 || h == 0 {
            Luma([0])
        } else {
            *image.get_pixel(sx, sy)
        }
    })
}
