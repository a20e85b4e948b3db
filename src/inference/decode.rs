//! SSD detection-output decoding.
//!
//! The output blob has shape `[1, 1, N, 7]`; each row is
//! `[image_id, label, score, xmin, ymin, xmax, ymax]` with normalized coordinates.
//! A row with a negative `image_id` marks the end of valid detections.

use super::engine::OutputTensor;
use super::error::InferenceError;
use crate::frame::{BoundingBox, Detection};

const ROW_LEN: usize = 7;

pub fn decode_ssd_output(output: &OutputTensor) -> Result<Vec<Detection>, InferenceError> {
    if let Some(&last) = output.shape.last() {
        if last != ROW_LEN {
            return Err(InferenceError::Decode(format!(
                "expected rows of {} values, output shape is {:?}",
                ROW_LEN, output.shape
            )));
        }
    }
    let expected: usize = output.shape.iter().product();
    if !output.shape.is_empty() && expected != output.data.len() {
        return Err(InferenceError::Decode(format!(
            "shape {:?} needs {} values, received {}",
            output.shape,
            expected,
            output.data.len()
        )));
    }
    if output.data.len() % ROW_LEN != 0 {
        return Err(InferenceError::Decode(format!(
            "{} values is not a whole number of rows",
            output.data.len()
        )));
    }

    let mut detections = Vec::new();
    for row in output.data.chunks_exact(ROW_LEN) {
        if row[0] < 0.0 {
            break;
        }
        detections.push(Detection {
            class_label: row[1] as i32,
            score: row[2].clamp(0.0, 1.0),
            bbox: BoundingBox {
                xmin: row[3].clamp(0.0, 1.0),
                ymin: row[4].clamp(0.0, 1.0),
                xmax: row[5].clamp(0.0, 1.0),
                ymax: row[6].clamp(0.0, 1.0),
            },
        });
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(rows: &[[f32; 7]]) -> OutputTensor {
        OutputTensor {
            shape: vec![1, 1, rows.len(), 7],
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[test]
    fn decodes_rows_until_terminator() {
        let out = tensor(&[
            [0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.4],
            [0.0, 2.0, 0.6, 0.5, 0.5, 0.9, 1.2],
            [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.99, 0.0, 0.0, 1.0, 1.0],
        ]);
        let dets = decode_ssd_output(&out).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_label, 1);
        assert_eq!(dets[0].bbox.xmin, 0.1);
        assert_eq!(dets[1].bbox.ymax, 1.0);
    }

    #[test]
    fn empty_output_has_no_detections() {
        let out = OutputTensor {
            shape: vec![1, 1, 0, 7],
            data: Vec::new(),
        };
        assert!(decode_ssd_output(&out).unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_row_width() {
        let out = OutputTensor {
            shape: vec![1, 1, 2, 6],
            data: vec![0.0; 12],
        };
        assert!(matches!(
            decode_ssd_output(&out),
            Err(InferenceError::Decode(_))
        ));
    }

    #[test]
    fn rejects_shape_data_mismatch() {
        let out = OutputTensor {
            shape: vec![1, 1, 3, 7],
            data: vec![0.0; 14],
        };
        assert!(decode_ssd_output(&out).is_err());
    }
}
