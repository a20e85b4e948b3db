//! Camera pixel formats to packed RGB24.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Y plane followed by interleaved UV at quarter resolution.
    /// Odd sizes round the chroma plane up to whole 2x2 blocks.
    Nv12,
    /// Packed Y0 U Y1 V, two pixels per four bytes. Odd widths pad each row to a whole pair.
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn frame_len(self, width: usize, height: usize) -> Option<usize> {
        let pixels = width.checked_mul(height)?;
        match self {
            Self::Rgb24 => pixels.checked_mul(3),
            Self::Nv12 => {
                let chroma = chroma_stride(width).checked_mul(height.div_ceil(2))?;
                pixels.checked_add(chroma)
            }
            Self::Yuyv => chroma_stride(width).checked_mul(2)?.checked_mul(height),
        }
    }
}

/// Bytes per row of interleaved chroma pairs, rounded up to a whole pair.
fn chroma_stride(width: usize) -> usize {
    width.div_ceil(2) * 2
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    let expected = format
        .frame_len(w, h)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short: expected {} bytes, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    let pixels = &pixels[..expected];

    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Nv12 => {
            let (luma, chroma) = pixels.split_at(w * h);
            let stride = chroma_stride(w);
            let mut rgb = Vec::with_capacity(w * h * 3);
            for j in 0..h {
                for i in 0..w {
                    let uv = (j / 2) * stride + (i / 2) * 2;
                    rgb.extend_from_slice(&yuv_to_rgb(luma[j * w + i], chroma[uv], chroma[uv + 1]));
                }
            }
            Ok(rgb)
        }
        PixelFormat::Yuyv => {
            let row_len = chroma_stride(w) * 2;
            let mut rgb = Vec::with_capacity(w * h * 3);
            for row in pixels.chunks_exact(row_len) {
                for (i, quad) in row.chunks_exact(4).enumerate() {
                    let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
                    rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                    if i * 2 + 1 < w {
                        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
                    }
                }
            }
            Ok(rgb)
        }
    }
}

/// BT.601 full-range conversion.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402 * v),
        clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_to_u8(y + 1.772 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
