//! Frame container and per-frame detection results.
//!
//! - `Frame`: one decoded RGB24 picture from a source, plus its sequence number.
//! - `Detection`: one model output record (class, score, normalized box).
//! - `FrameResult`: all detections for a frame plus the frame's pixel dimensions.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Decoded RGB24 frame. Owned by the orchestrator for the duration of one loop iteration.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// 0-based position in the stream.
    pub index: u64,
}

impl Frame {
    /// Wrap tightly packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
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
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Raw interleaved RGB bytes, row-major, no padding.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Normalized bounding box, all coordinates in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Pixel rectangle `(x, y, width, height)` for a frame of the given size.
    ///
    /// Coordinates truncate toward zero. Returns `None` for degenerate boxes.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
        let x_min = (self.xmin * width as f32) as i32;
        let y_min = (self.ymin * height as f32) as i32;
        let x_max = (self.xmax * width as f32) as i32;
        let y_max = (self.ymax * height as f32) as i32;
        if x_max <= x_min || y_max <= y_min {
            return None;
        }
        Some((
            x_min,
            y_min,
            (x_max - x_min) as u32,
            (y_max - y_min) as u32,
        ))
    }
}

/// One detection produced by the inference engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub class_label: i32,
    /// Confidence in [0, 1].
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn qualifies(&self, target_class: i32, threshold: f32) -> bool {
        self.class_label == target_class && self.score > threshold
    }
}

/// Ordered detections for one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
    pub width: u32,
    pub height: u32,
}

impl FrameResult {
    /// Detections of the target class whose score exceeds the threshold.
    pub fn qualifying(&self, target_class: i32, threshold: f32) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(move |d| d.qualifies(target_class, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_label: i32, score: f32) -> Detection {
        Detection {
            class_label,
            score,
            bbox: BoundingBox {
                xmin: 0.1,
                ymin: 0.1,
                xmax: 0.5,
                ymax: 0.5,
            },
        }
    }

    #[test]
    fn from_rgb_rejects_wrong_length() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2, 1).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.as_bytes().len(), 12);
    }

    #[test]
    fn qualifying_uses_strict_threshold_and_class() {
        let result = FrameResult {
            detections: vec![det(1, 0.9), det(1, 0.5), det(2, 0.99), det(1, 0.51)],
            width: 640,
            height: 480,
        };
        assert_eq!(result.qualifying(1, 0.5).count(), 2);
    }

    #[test]
    fn bbox_to_pixels_truncates() {
        let bbox = BoundingBox {
            xmin: 0.25,
            ymin: 0.5,
            xmax: 0.75,
            ymax: 0.999,
        };
        assert_eq!(bbox.to_pixels(100, 10), Some((25, 5, 50, 4)));
        let flat = BoundingBox {
            xmin: 0.5,
            ymin: 0.5,
            xmax: 0.5,
            ymax: 0.9,
        };
        assert_eq!(flat.to_pixels(100, 100), None);
    }
}
