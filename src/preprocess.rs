//! Frame to input-tensor conversion.

use image::imageops::{self, FilterType};
use ndarray::Array4;
use thiserror::Error;

use crate::frame::Frame;

/// Channel order the model was trained with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    /// OpenVINO/Caffe-style models expect BGR planes.
    #[default]
    Bgr,
}

impl std::str::FromStr for ChannelOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            other => Err(anyhow::anyhow!(
                "unknown channel order '{}': expected 'rgb' or 'bgr'",
                other
            )),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("frame has zero area")]
    EmptyFrame,
    #[error("target size {height}x{width} has zero area")]
    ZeroTarget { height: usize, width: usize },
    #[error("resized buffer does not match {height}x{width}x3")]
    BufferMismatch { height: usize, width: usize },
}

/// NCHW `f32` tensor with batch size 1, tagged with the source frame size.
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub data: Array4<f32>,
    pub source_width: u32,
    pub source_height: u32,
}

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Resize to `target_height` x `target_width`, reorder HWC to CHW, prepend a batch axis.
///
/// Pixel values stay in 0..=255.
pub fn preprocess(
    frame: &Frame,
    target_height: usize,
    target_width: usize,
    order: ChannelOrder,
) -> Result<InputTensor, PreprocessError> {
    if frame.is_empty() {
        return Err(PreprocessError::EmptyFrame);
    }
    if target_height == 0 || target_width == 0 {
        return Err(PreprocessError::ZeroTarget {
            height: target_height,
            width: target_width,
        });
    }

    let resized = if frame.width() as usize == target_width
        && frame.height() as usize == target_height
    {
        frame.image().clone()
    } else {
        imageops::resize(
            frame.image(),
            target_width as u32,
            target_height as u32,
            FilterType::Triangle,
        )
    };
    let pixels = resized.as_raw();
    if pixels.len() != target_height * target_width * 3 {
        return Err(PreprocessError::BufferMismatch {
            height: target_height,
            width: target_width,
        });
    }

    let data = Array4::from_shape_fn(
        (1, 3, target_height, target_width),
        |(_, channel, y, x)| {
            let source_channel = match order {
                ChannelOrder::Rgb => channel,
                ChannelOrder::Bgr => 2 - channel,
            };
            pixels[(y * target_width + x) * 3 + source_channel] as f32
        },
    );

    Ok(InputTensor {
        data,
        source_width: frame.width(),
        source_height: frame.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame::from_rgb(pixels, width, height, 1).unwrap()
    }

    #[test]
    fn produces_nchw_with_batch_axis() {
        let frame = solid_frame(64, 48, [10, 20, 30]);
        let tensor = preprocess(&frame, 30, 40, ChannelOrder::Rgb).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 30, 40]);
        assert_eq!(tensor.source_width, 64);
        assert_eq!(tensor.source_height, 48);
        assert_eq!(tensor.data[[0, 0, 5, 5]], 10.0);
        assert_eq!(tensor.data[[0, 1, 5, 5]], 20.0);
        assert_eq!(tensor.data[[0, 2, 29, 39]], 30.0);
    }

    #[test]
    fn bgr_order_swaps_planes() {
        let frame = solid_frame(8, 8, [1, 2, 3]);
        let tensor = preprocess(&frame, 8, 8, ChannelOrder::Bgr).unwrap();
        assert_eq!(tensor.data[[0, 0, 0, 0]], 3.0);
        assert_eq!(tensor.data[[0, 1, 0, 0]], 2.0);
        assert_eq!(tensor.data[[0, 2, 0, 0]], 1.0);
    }

    #[test]
    fn keeps_spatial_layout() {
        // left half black, right half white
        let (w, h) = (4u32, 2u32);
        let mut pixels = Vec::new();
        for _y in 0..h {
            for x in 0..w {
                let v = if x < 2 { 0 } else { 255 };
                pixels.extend_from_slice(&[v, v, v]);
            }
        }
        let frame = Frame::from_rgb(pixels, w, h, 1).unwrap();
        let tensor = preprocess(&frame, 2, 4, ChannelOrder::Rgb).unwrap();
        assert_eq!(tensor.data[[0, 0, 1, 0]], 0.0);
        assert_eq!(tensor.data[[0, 0, 1, 3]], 255.0);
    }

    #[test]
    fn channel_order_parses_from_str() {
        assert_eq!(" RGB ".parse::<ChannelOrder>().unwrap(), ChannelOrder::Rgb);
        assert_eq!("bgr".parse::<ChannelOrder>().unwrap(), ChannelOrder::Bgr);
        assert!("yuv".parse::<ChannelOrder>().is_err());
    }

    #[test]
    fn rejects_empty_input() {
        let frame = Frame::from_rgb(Vec::new(), 0, 0, 1).unwrap();
        assert_eq!(
            preprocess(&frame, 10, 10, ChannelOrder::Bgr).unwrap_err(),
            PreprocessError::EmptyFrame
        );
        let frame = solid_frame(4, 4, [0, 0, 0]);
        assert!(matches!(
            preprocess(&frame, 0, 10, ChannelOrder::Bgr),
            Err(PreprocessError::ZeroTarget { .. })
        ));
    }
}
