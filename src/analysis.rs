//! Frame risk analysis.
//!
//! Three independent signals are scored in points and summed:
//!
//! | Signal | Input | Points |
//! |---|---|---|
//! | lighting | mean intensity (0..=255) | poor 30, dim 20, moderate 10, good 5, excellent 0 |
//! | crowd density | person count | isolated 25, sparse 15, moderate 5, crowded 10, very crowded 20 |
//! | time of day | local hour | high 25, medium 15, low 5 |
//!
//! Crowd points are intentionally non-monotonic: being alone or with one or two
//! others scores higher than a moderate crowd.
//!
//! The total maps to a level: 70+ critical, 50+ high, 30+ medium, otherwise safe.
//! Everything here is a pure function of frame, detections and clock.

use std::fmt;

use chrono::{DateTime, Local, SecondsFormat, Timelike};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionSet;
use crate::frame::Frame;

/// Frame area, in pixels, that the informational density is expressed per.
const DENSITY_AREA_UNIT: f64 = 100_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lighting {
    Poor,
    Dim,
    Moderate,
    Good,
    Excellent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrowdDensity {
    Isolated,
    Sparse,
    Moderate,
    Crowded,
    VeryCrowded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRisk {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, RiskLevel::Safe)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Always `normal`; movement is not tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementPattern {
    #[default]
    Normal,
}

/// Latest analysis, as served on `/analysis`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub lighting: Lighting,
    pub crowd_density: CrowdDensity,
    pub time_risk: TimeRisk,
    pub movement_pattern: MovementPattern,
    pub person_count: usize,
    /// RFC 3339 local time of the analysis.
    pub timestamp: String,
}

impl AnalysisResult {
    /// Value published before any frame has been processed.
    pub fn initial(now: DateTime<Local>) -> Self {
        Self {
            risk_score: 0,
            risk_level: RiskLevel::Safe,
            lighting: Lighting::Good,
            crowd_density: CrowdDensity::Moderate,
            time_risk: TimeRisk::Low,
            movement_pattern: MovementPattern::Normal,
            person_count: 0,
            timestamp: format_timestamp(now),
        }
    }
}

pub fn format_timestamp(now: DateTime<Local>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn classify_brightness(mean: f64) -> (Lighting, u32) {
    if mean < 50.0 {
        (Lighting::Poor, 30)
    } else if mean < 80.0 {
        (Lighting::Dim, 20)
    } else if mean < 120.0 {
        (Lighting::Moderate, 10)
    } else if mean < 180.0 {
        (Lighting::Good, 5)
    } else {
        (Lighting::Excellent, 0)
    }
}

/// Mean intensity of the frame, using ITU-R BT.601 luma per pixel.
pub fn mean_brightness(frame: &Frame) -> f64 {
    let pixels = frame.area();
    if pixels == 0 {
        return 0.0;
    }
    let total: u64 = frame
        .image()
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let luma = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
            u64::from((luma + 500) / 1000)
        })
        .sum();
    total as f64 / pixels as f64
}

pub fn classify_crowd(person_count: usize) -> (CrowdDensity, u32) {
    match person_count {
        0 => (CrowdDensity::Isolated, 25),
        1..=2 => (CrowdDensity::Sparse, 15),
        3..=5 => (CrowdDensity::Moderate, 5),
        6..=10 => (CrowdDensity::Crowded, 10),
        _ => (CrowdDensity::VeryCrowded, 20),
    }
}

/// People per 100k pixels of frame. Logged only; never scored.
pub fn density_per_area(person_count: usize, frame_area: u64) -> f64 {
    if frame_area == 0 {
        return 0.0;
    }
    person_count as f64 / (frame_area as f64 / DENSITY_AREA_UNIT)
}

/// Branches are checked in order; the medium branch never sees hours 22..=5.
pub fn classify_hour(hour: u32) -> (TimeRisk, u32) {
    if hour >= 22 || hour <= 5 {
        (TimeRisk::High, 25)
    } else if hour >= 18 || hour <= 7 {
        (TimeRisk::Medium, 15)
    } else {
        (TimeRisk::Low, 5)
    }
}

pub fn risk_level(score: u32) -> RiskLevel {
    if score >= 70 {
        RiskLevel::Critical
    } else if score >= 50 {
        RiskLevel::High
    } else if score >= 30 {
        RiskLevel::Medium
    } else {
        RiskLevel::Safe
    }
}

/// Sum the signal points and map the total to a level.
pub fn combine(lighting: u32, crowd: u32, time: u32) -> (u32, RiskLevel) {
    let total = lighting + crowd + time;
    (total, risk_level(total))
}

/// Score already-measured signals.
pub fn score(
    brightness: f64,
    person_count: usize,
    frame_area: u64,
    now: DateTime<Local>,
) -> AnalysisResult {
    let (lighting, lighting_points) = classify_brightness(brightness);
    let (crowd_density, crowd_points) = classify_crowd(person_count);
    let (time_risk, time_points) = classify_hour(now.hour());
    let (risk_score, risk_level) = combine(lighting_points, crowd_points, time_points);

    log::debug!(
        "brightness {:.1}, {} people ({:.2} per 100k px), hour {} -> score {} ({})",
        brightness,
        person_count,
        density_per_area(person_count, frame_area),
        now.hour(),
        risk_score,
        risk_level
    );

    AnalysisResult {
        risk_score,
        risk_level,
        lighting,
        crowd_density,
        time_risk,
        movement_pattern: MovementPattern::Normal,
        person_count,
        timestamp: format_timestamp(now),
    }
}

/// Analyse one frame and its detections at `now`.
pub fn analyze(frame: &Frame, detections: &DetectionSet, now: DateTime<Local>) -> AnalysisResult {
    score(
        mean_brightness(frame),
        detections.person_count(),
        frame.area(),
        now,
    )
}
