//! Model asset discovery.
//!
//! Assets live in one directory under fixed filenames:
//!
//! | File | Used by |
//! |---|---|
//! | `yolov4-tiny.cfg` + `yolov4-tiny.onnx` | neural detector (first choice) |
//! | `yolov3.cfg` + `yolov3.onnx` | neural detector (second choice) |
//! | `coco.names` | neural detector category list |
//! | `hog_people.svm` | classical detector SVM coefficients |
//!
//! The `.cfg` is the darknet network description; only its `[net]` input size is
//! read. The `.onnx` holds the weights of the same network.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Neural network candidates, in preference order: (label, config, weights).
const NEURAL_CANDIDATES: &[(&str, &str, &str)] = &[
    ("yolov4-tiny", "yolov4-tiny.cfg", "yolov4-tiny.onnx"),
    ("yolov3", "yolov3.cfg", "yolov3.onnx"),
];

pub const CATEGORY_NAMES_FILE: &str = "coco.names";
pub const HOG_SVM_FILE: &str = "hog_people.svm";
pub const PERSON_LABEL: &str = "person";

/// Default darknet input size when the config omits it.
const DEFAULT_INPUT_SIZE: u32 = 416;

/// A config/weights pair for one neural network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeuralAssets {
    pub label: &'static str,
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Assets found in a model directory.
#[derive(Clone, Debug)]
pub struct ModelAssets {
    pub dir: PathBuf,
}

impl ModelAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Neural candidates whose config and weights are both present.
    pub fn neural_candidates(&self) -> Vec<NeuralAssets> {
        NEURAL_CANDIDATES
            .iter()
            .map(|&(label, config, weights)| NeuralAssets {
                label,
                config: self.dir.join(config),
                weights: self.dir.join(weights),
            })
            .filter(|assets| assets.config.is_file() && assets.weights.is_file())
            .collect()
    }

    pub fn category_names_path(&self) -> PathBuf {
        self.dir.join(CATEGORY_NAMES_FILE)
    }

    /// Path of the classical detector coefficients, when present.
    pub fn hog_svm_path(&self) -> Option<PathBuf> {
        let path = self.dir.join(HOG_SVM_FILE);
        path.is_file().then_some(path)
    }

    /// Category names, one per line. Falls back to `["person"]` when unreadable.
    pub fn category_names(&self) -> Vec<String> {
        let path = self.category_names_path();
        match read_category_names(&path) {
            Ok(names) => names,
            Err(err) => {
                log::warn!("{}; using a single '{}' category", err, PERSON_LABEL);
                vec![PERSON_LABEL.to_string()]
            }
        }
    }
}

fn read_category_names(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read category names {}", path.display()))?;
    let names: Vec<String> = raw
        .trim()
        .lines()
        .map(|line| line.trim().to_string())
        .collect();
    if names.iter().all(|name| name.is_empty()) {
        return Err(anyhow!("category names file {} is empty", path.display()));
    }
    Ok(names)
}

/// Index of the person category (0 when the list has no "person" entry).
pub fn person_class_index(names: &[String]) -> usize {
    names
        .iter()
        .position(|name| name == PERSON_LABEL)
        .unwrap_or(0)
}

/// Square network input size declared in a darknet config's `[net]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetInput {
    pub width: u32,
    pub height: u32,
}

impl NetInput {
    pub fn from_darknet_config(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read network config {}", path.display()))?;
        Self::parse_darknet(&raw)
            .with_context(|| format!("invalid network config {}", path.display()))
    }

    pub fn parse_darknet(raw: &str) -> Result<Self> {
        let mut in_net = false;
        let mut width = None;
        let mut height = None;
        for line in raw.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_net = line == "[net]" || line == "[network]";
                continue;
            }
            if !in_net {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let parse = |v: &str| {
                    v.trim()
                        .parse::<u32>()
                        .map_err(|_| anyhow!("{} must be a positive integer", key.trim()))
                };
                match key.trim() {
                    "width" => width = Some(parse(value)?),
                    "height" => height = Some(parse(value)?),
                    _ => {}
                }
            }
        }
        let input = Self {
            width: width.unwrap_or(DEFAULT_INPUT_SIZE),
            height: height.unwrap_or(DEFAULT_INPUT_SIZE),
        };
        if input.width == 0 || input.height == 0 {
            return Err(anyhow!("network input size must be non-zero"));
        }
        Ok(input)
    }
}
