/// Axis-aligned person box in pixel coordinates of the original frame.
///
/// Boxes may extend past the frame edges; nothing clips them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = i64::from(self.x).max(i64::from(other.x));
        let top = i64::from(self.y).max(i64::from(other.y));
        let right = (i64::from(self.x) + i64::from(self.width))
            .min(i64::from(other.x) + i64::from(other.width));
        let bottom = (i64::from(self.y) + i64::from(self.height))
            .min(i64::from(other.y) + i64::from(other.height));
        if right <= left || bottom <= top {
            return 0.0;
        }
        let intersection = ((right - left) * (bottom - top)) as f64;
        let union = self.area() as f64 + other.area() as f64 - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union) as f32
    }

    /// Map a box found in a resized copy of the frame back to the original frame.
    ///
    /// `scale` is the factor the frame was resized by before detection.
    pub fn unscale(&self, scale: f32) -> BoundingBox {
        BoundingBox {
            x: (self.x as f32 / scale) as i32,
            y: (self.y as f32 / scale) as i32,
            width: (self.width as f32 / scale) as u32,
            height: (self.height as f32 / scale) as u32,
        }
    }
}

/// Candidate box with the detector's confidence, before suppression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredBox {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Ordered person boxes for one frame. Its length is the person count.
///
/// No identity is carried from one frame to the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    pub boxes: Vec<BoundingBox>,
}

impl DetectionSet {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }

    pub fn person_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundingBox> {
        self.boxes.iter()
    }
}
