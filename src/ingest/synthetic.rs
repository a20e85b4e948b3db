//! Synthetic frame source (`stub://`) for tests and demos.

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, ReadError, SourceStats};
use crate::frame::Frame;

/// Parameters of a `stub://name?frames=N&fps=F&width=W&height=H` source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub uri: String,
    /// Frames before end of stream. `None` runs until cancelled.
    pub frames: Option<u64>,
    /// Reported frame rate. `None` leaves the fallback to the caller.
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            uri: "stub://synthetic".to_string(),
            frames: None,
            fps: Some(30.0),
            width: 160,
            height: 120,
        }
    }
}

impl SyntheticConfig {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub source uri: {}", uri))?;
        let mut config = Self {
            uri: uri.to_string(),
            ..Self::default()
        };
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "frames" => {
                    config.frames = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid frame count '{}'", value))?,
                    )
                }
                "fps" => {
                    let fps: f64 = value
                        .parse()
                        .with_context(|| format!("invalid fps '{}'", value))?;
                    config.fps = (fps > 0.0).then_some(fps);
                }
                "width" => {
                    config.width = value
                        .parse()
                        .with_context(|| format!("invalid width '{}'", value))?
                }
                "height" => {
                    config.height = value
                        .parse()
                        .with_context(|| format!("invalid height '{}'", value))?
                }
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!("SyntheticSource: opened {}", config.uri);
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.config.uri.clone()
    }

    fn fps(&self) -> Option<f64> {
        self.config.fps
    }

    fn next_frame(&mut self) -> Result<Frame, ReadError> {
        if self.config.frames.is_some_and(|limit| self.frame_count >= limit) {
            return Err(ReadError::EndOfStream);
        }
        let pixels = self.generate_pixels();
        let frame = Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
        .map_err(ReadError::Decode)?;
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

    #[test]
    fn stops_after_frame_limit() {
        let config = SyntheticConfig::from_uri("stub://test?frames=2&width=8&height=4").unwrap();
        let mut source = SyntheticSource::new(config);
        let first = source.next_frame().unwrap();
        assert_eq!((first.width(), first.height(), first.index), (8, 4, 0));
        assert_eq!(source.next_frame().unwrap().index, 1);
        assert!(matches!(source.next_frame(), Err(ReadError::EndOfStream)));
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn zero_fps_is_unknown() {
        let config = SyntheticConfig::from_uri("stub://test?fps=0").unwrap();
        assert_eq!(config.fps, None);
        let config = SyntheticConfig::from_uri("stub://test?fps=12.5").unwrap();
        assert_eq!(config.fps, Some(12.5));
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::from_uri("stub://test?frames=x").is_err());
        assert!(SyntheticConfig::from_uri("stub://test?width=0").is_err());
        assert!(SyntheticConfig::from_uri("stub://test?color=red").is_err());
        assert!(SyntheticConfig::from_uri("/dev/video0").is_err());
    }
}
