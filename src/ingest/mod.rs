//! Frame sources.
//!
//! Every source yields RGB24 `Frame`s through `FrameSource::next_frame` and
//! distinguishes a clean end of stream from a failed read:
//! - `stub://` synthetic frames (tests, demos)
//! - still images (`.jpg`, `.jpeg`, `.png`, `.bmp`): one frame, then end of stream
//! - local video files (feature: ingest-file-ffmpeg)
//! - `CAM` / V4L2 devices (feature: ingest-v4l2)

pub mod still;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use thiserror::Error;

use crate::frame::Frame;

pub use still::ImageSource;
#[cfg(feature = "ingest-file-ffmpeg")]
pub use file_ffmpeg::FfmpegFileSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Input sentinel for the default camera.
pub const CAMERA_SENTINEL: &str = "CAM";
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Error)]
pub enum ReadError {
    /// The source is exhausted. Normal termination.
    #[error("end of stream")]
    EndOfStream,

    /// A frame could not be read or decoded.
    #[error("frame read failed: {0:#}")]
    Decode(anyhow::Error),
}

/// Running statistics for a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
}

pub trait FrameSource {
    /// Human-readable identifier for logs.
    fn describe(&self) -> String;

    /// Nominal frame rate, when the source knows it.
    fn fps(&self) -> Option<f64>;

    /// Read the next frame.
    fn next_frame(&mut self) -> Result<Frame, ReadError>;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by an input identifier.
pub fn open_source(input: &str) -> Result<Box<dyn FrameSource>> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("input source must not be empty");
    }
    if input.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig::from_uri(input)?)));
    }
    if input == CAMERA_SENTINEL || input.starts_with("/dev/video") {
        let device = if input == CAMERA_SENTINEL {
            DEFAULT_CAMERA_DEVICE
        } else {
            input
        };
        return open_camera(device);
    }
    if input.contains("://") {
        anyhow::bail!("input '{}' must be a local path, CAM or stub://", input);
    }
    if is_image_path(input) {
        return Ok(Box::new(ImageSource::open(input)?));
    }
    open_video_file(input)
}

fn is_image_path(input: &str) -> bool {
    std::path::Path::new(input)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    let mut source = V4l2Source::new(V4l2Config {
        device: device.to_string(),
        ..V4l2Config::default()
    })?;
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("camera input {} requires the ingest-v4l2 feature", device)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video_file(path: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegFileSource::open(path)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video_file(path: &str) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("video file {} requires the ingest-file-ffmpeg feature", path)
}
