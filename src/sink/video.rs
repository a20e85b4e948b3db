use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};

use crate::frame::Frame;

pub const STDOUT_TARGET: &str = "-";
pub const DISABLED_TARGET: &str = "none";

/// Destination for annotated frames.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// Writes raw RGB24 frames back to back, flushing after each one.
///
/// Consumers need the frame size out of band (e.g. `ffmpeg -f rawvideo
/// -pixel_format rgb24 -video_size WxH`).
pub struct RawVideoSink<W: Write> {
    writer: W,
    frames_written: u64,
}

impl<W: Write> RawVideoSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
        }
    }

    /// Buffer `writer` so each frame reaches it as one write, whatever its bytes.
    pub fn buffered(writer: W) -> RawVideoSink<BufWriter<W>> {
        RawVideoSink::new(BufWriter::new(writer))
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> VideoSink for RawVideoSink<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.writer
            .write_all(frame.as_bytes())
            .context("failed to write video frame")?;
        self.writer.flush().context("failed to flush video frame")?;
        self.frames_written += 1;
        Ok(())
    }
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullVideoSink;

impl VideoSink for NullVideoSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Open the video output named by `target`: `-` for stdout, `none` to
/// disable, anything else is a file path.
pub fn open_video_sink(target: &str) -> Result<Box<dyn VideoSink>> {
    match target.trim() {
        STDOUT_TARGET => Ok(Box::new(RawVideoSink::buffered(std::io::stdout().lock()))),
        t if t.is_empty() || t.eq_ignore_ascii_case(DISABLED_TARGET) => Ok(Box::new(NullVideoSink)),
        path => {
            let file = File::create(path)
                .with_context(|| format!("failed to create video output {}", path))?;
            log::info!("writing raw rgb24 video to {}", path);
            Ok(Box::new(RawVideoSink::buffered(file)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Frame {
        Frame::from_rgb(vec![fill; 2 * 2 * 3], 2, 2, 0).unwrap()
    }

    #[test]
    fn writes_frames_back_to_back() {
        let mut sink = RawVideoSink::new(Vec::new());
        sink.write_frame(&frame(1)).unwrap();
        sink.write_frame(&frame(2)).unwrap();
        assert_eq!(sink.frames_written(), 2);
        let bytes = sink.into_inner();
        assert_eq!(bytes.len(), 24);
        assert!(bytes[..12].iter().all(|b| *b == 1));
        assert!(bytes[12..].iter().all(|b| *b == 2));
    }

    /// Counts the write calls reaching it.
    #[derive(Default)]
    struct CountingWriter {
        writes: usize,
        bytes: usize,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes += 1;
            self.bytes += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn newline_bytes_do_not_split_a_buffered_frame() {
        let mut sink = RawVideoSink::buffered(CountingWriter::default());
        sink.write_frame(&frame(b'\n')).unwrap();
        let inner = sink.into_inner().into_inner().ok().unwrap();
        assert_eq!(inner.writes, 1);
        assert_eq!(inner.bytes, 12);
    }

    #[test]
    fn file_target_receives_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.rgb");
        {
            let mut sink = open_video_sink(path.to_str().unwrap()).unwrap();
            sink.write_frame(&frame(7)).unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), vec![7; 12]);
    }

    #[test]
    fn write_failure_is_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut sink = RawVideoSink::new(Broken);
        assert!(sink.write_frame(&frame(0)).is_err());
    }
}
