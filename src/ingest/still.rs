//! Still-image source: yields the image once, then end of stream.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{FrameSource, ReadError, SourceStats};
use crate::frame::Frame;

pub struct ImageSource {
    path: PathBuf,
    pending: Option<Frame>,
    frame_count: u64,
}

impl ImageSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let image = image::open(&path)
            .with_context(|| format!("failed to read image {}", path.display()))?
            .to_rgb8();
        log::info!(
            "ImageSource: loaded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self {
            path,
            pending: Some(Frame::from_image(image, 0)),
            frame_count: 0,
        })
    }
}

impl FrameSource for ImageSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fps(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> Result<Frame, ReadError> {
        let frame = self.pending.take().ok_or(ReadError::EndOfStream)?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn yields_single_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(6, 4, Rgb([10, 20, 30])).save(&path).unwrap();

        let mut source = ImageSource::open(&path).unwrap();
        assert_eq!(source.fps(), None);
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 4));
        assert_eq!(&frame.as_bytes()[..3], &[10, 20, 30]);
        assert!(matches!(source.next_frame(), Err(ReadError::EndOfStream)));
    }

    #[test]
    fn missing_file_fails_to_open() {
        assert!(ImageSource::open("/nonexistent/still.jpg").is_err());
    }
}
