//! Bounding-box overlay for outbound video frames.

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::frame::{Detection, Frame};

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BOX_THICKNESS: u32 = 3;

/// Draw a rectangle for each detection onto the frame.
///
/// Boxes are drawn centered on the detection edge, clipped to the frame.
/// Degenerate boxes are skipped. Returns how many boxes were drawn.
pub fn annotate<'a>(frame: &mut Frame, detections: impl IntoIterator<Item = &'a Detection>) -> usize {
    let (width, height) = (frame.width(), frame.height());
    let mut drawn = 0;
    for detection in detections {
        let Some((x, y, w, h)) = detection.bbox.to_pixels(width, height) else {
            continue;
        };
        draw_thick_rect(frame, x, y, w, h);
        drawn += 1;
    }
    drawn
}

fn draw_thick_rect(frame: &mut Frame, x: i32, y: i32, w: u32, h: u32) {
    let half = (BOX_THICKNESS / 2) as i32;
    for offset in -half..=half {
        let rw = w as i64 + 2 * offset as i64;
        let rh = h as i64 + 2 * offset as i64;
        if rw <= 0 || rh <= 0 {
            continue;
        }
        let rect = Rect::at(x - offset, y - offset).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(frame.image_mut(), rect, BOX_COLOR);
    }
}
