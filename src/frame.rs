//! Per-iteration frame container.
//!
//! A `Frame` is produced once per pipeline iteration by the camera source and is
//! owned exclusively by that iteration:
//!
//! - Detectors and the analyzer borrow it read-only.
//! - The overlay renderer is the only stage that mutates it, in place, just before
//!   encoding.
//! - It is dropped at the end of the iteration; nothing retains it across frames.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Owned RGB pixel buffer for one pipeline iteration.
///
/// Deliberately not `Clone`: a frame is never shared across iterations.
pub struct Frame {
    image: RgbImage,
    /// Capture sequence number assigned by the source (1-based).
    pub sequence: u64,
}

impl Frame {
    /// Wrap an already decoded RGB image.
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image, sequence })
    }

    /// Uniformly filled frame, mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel area (height × width).
    pub fn area(&self) -> u64 {
        u64::from(self.image.width()) * u64::from(self.image.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Mutable access for the overlay stage.
    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 1).is_err());
        let frame = Frame::from_rgb(vec![7u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.area(), 4);
    }

    #[test]
    fn filled_frame_has_uniform_pixels() {
        let frame = Frame::filled(4, 3, [10, 20, 30], 9);
        assert_eq!(frame.sequence, 9);
        assert!(frame.image().pixels().all(|p| p.0 == [10, 20, 30]));
    }
}
