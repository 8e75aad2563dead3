//! Neural person detector.
//!
//! Runs a YOLO-family ONNX export through tract (feature: backend-tract). The
//! network sees the frame stretched to its square input, in RGB order, scaled to
//! [0,1]. Each output row is `(cx, cy, w, h, objectness, class scores...)`,
//! normalised to the input, so boxes map back to the original frame by
//! multiplying with the frame's own width and height.

use anyhow::{anyhow, Context, Result};
#[cfg(feature = "backend-tract")]
use tract_onnx::prelude::*;

use crate::detect::assets::{person_class_index, NetInput, NeuralAssets};
use crate::detect::backend::{DetectorBackend, DetectorKind};
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, DetectionSet, ScoredBox};
use crate::frame::Frame;

/// Minimum class confidence for a candidate to be considered.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Score threshold handed to NMS.
pub const NMS_SCORE_THRESHOLD: f32 = 0.5;
/// IoU above which a lower-confidence box is suppressed.
pub const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Leading values of each output row before the class scores.
const ROW_PREFIX: usize = 5;

/// Tract-based YOLO backend.
pub struct YoloBackend {
    #[cfg(feature = "backend-tract")]
    model: TypedRunnableModel<TypedModel>,
    input: NetInput,
    person_class: usize,
    label: &'static str,
}

impl YoloBackend {
    /// Load the network described by `assets`.
    pub fn load(assets: &NeuralAssets, category_names: &[String]) -> Result<Self> {
        let input = NetInput::from_darknet_config(&assets.config)?;
        let person_class = person_class_index(category_names);

        #[cfg(feature = "backend-tract")]
        {
            let model = tract_onnx::onnx()
                .model_for_path(&assets.weights)
                .with_context(|| {
                    format!("failed to load ONNX model from {}", assets.weights.display())
                })?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, input.height as usize, input.width as usize),
                    ),
                )
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?;

            Ok(Self {
                model,
                input,
                person_class,
                label: assets.label,
            })
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            let _ = (input, person_class);
            Err(anyhow!(
                "{} found but neural inference requires the backend-tract feature",
                assets.label
            ))
        }
    }

    /// Network label (e.g. "yolov4-tiny").
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[cfg(feature = "backend-tract")]
    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            frame.image(),
            self.input.width,
            self.input.height,
            image::imageops::FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input.height as usize, self.input.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    #[cfg(feature = "backend-tract")]
    fn run(&self, frame: &Frame) -> Result<Vec<ScoredBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let mut candidates = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let row_len = *view
                .shape()
                .last()
                .ok_or_else(|| anyhow!("model output has no dimensions"))?;
            let values: Vec<f32> = view.iter().copied().collect();
            candidates.extend(decode_rows(
                &values,
                row_len,
                self.person_class,
                frame.width(),
                frame.height(),
            )?);
        }
        Ok(candidates)
    }

    #[cfg(not(feature = "backend-tract"))]
    fn run(&self, _frame: &Frame) -> Result<Vec<ScoredBox>> {
        Err(anyhow!("built without the backend-tract feature"))
    }
}

impl DetectorBackend for YoloBackend {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Yolo
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
        let candidates = self.run(frame)?;
        let kept = non_max_suppression(&candidates, NMS_SCORE_THRESHOLD, NMS_IOU_THRESHOLD);
        Ok(DetectionSet::new(kept.into_iter().map(|c| c.bbox).collect()))
    }

    /// One inference on a black frame of the network's input size, so a model
    /// whose outputs cannot be decoded is rejected at startup.
    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input.width, self.input.height, [0, 0, 0], 0);
        self.run(&blank)
            .map(|_| ())
            .with_context(|| format!("{} warm-up inference failed", self.label))
    }
}

/// Decode raw network rows into person candidates in original-frame pixels.
///
/// Rows whose arg-max class is not `person_class`, or whose class confidence
/// does not exceed `CONFIDENCE_THRESHOLD`, are skipped.
pub fn decode_rows(
    values: &[f32],
    row_len: usize,
    person_class: usize,
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<ScoredBox>> {
    if row_len <= ROW_PREFIX {
        return Err(anyhow!(
            "output rows of {} values carry no class scores",
            row_len
        ));
    }
    if values.len() % row_len != 0 {
        return Err(anyhow!(
            "output of {} values is not a whole number of {}-value rows",
            values.len(),
            row_len
        ));
    }

    let width = frame_width as f32;
    let height = frame_height as f32;
    let mut candidates = Vec::new();
    for row in values.chunks_exact(row_len) {
        let scores = &row[ROW_PREFIX..];
        let Some((class_id, confidence)) = arg_max(scores) else {
            continue;
        };
        if class_id != person_class || confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let center_x = (row[0] * width) as i32;
        let center_y = (row[1] * height) as i32;
        let w = (row[2] * width) as i32;
        let h = (row[3] * height) as i32;
        if w <= 0 || h <= 0 {
            continue;
        }
        let x = (center_x as f32 - w as f32 / 2.0) as i32;
        let y = (center_y as f32 - h as f32 / 2.0) as i32;

        candidates.push(ScoredBox {
            bbox: BoundingBox::new(x, y, w as u32, h as u32),
            confidence,
        });
    }
    Ok(candidates)
}

/// First index of the maximum score.
fn arg_max(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
}
