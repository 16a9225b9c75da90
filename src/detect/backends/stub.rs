//! Stub detector backend.
//!
//! Emits deterministic raw predictions without any model file, keyed by the
//! `stub://` identifier. Used by tests and the demo path:
//!
//! - `stub://person` (and any unrecognized preset): three raw person boxes,
//!   two heavily overlapping, so suppression at IoU 0.45 keeps exactly two.
//! - `stub://empty`: candidates with near-zero scores only.

use anyhow::{anyhow, Result};
use ndarray::{Array2, Array4};

use crate::detect::backend::{Detector, ModelInfo};

const INPUT_SIZE: u32 = 640;
const CLASS_NAMES: [&str; 4] = ["person", "bicycle", "car", "dog"];

pub struct StubBackend {
    info: ModelInfo,
    empty: bool,
}

impl StubBackend {
    pub fn new(identifier: &str) -> Result<Self> {
        if !identifier.starts_with("stub://") {
            return Err(anyhow!("stub backend requires a stub:// identifier"));
        }
        Ok(Self {
            info: ModelInfo {
                identifier: identifier.to_string(),
                input_width: INPUT_SIZE,
                input_height: INPUT_SIZE,
                class_names: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            },
            empty: identifier == "stub://empty",
        })
    }

    fn predictions(&self) -> Array2<f32> {
        // Columns: cx, cy, w, h, then one score per class.
        let mut raw = Array2::zeros((3, 4 + CLASS_NAMES.len()));
        let boxes: [[f32; 4]; 3] = [
            [160.0, 200.0, 80.0, 160.0],
            [164.0, 202.0, 80.0, 160.0],
            [420.0, 340.0, 90.0, 180.0],
        ];
        let scores = if self.empty {
            [0.01, 0.01, 0.01]
        } else {
            [0.88, 0.79, 0.61]
        };
        for (row, (bbox, score)) in boxes.iter().zip(scores.iter()).enumerate() {
            for (col, value) in bbox.iter().enumerate() {
                raw[[row, col]] = *value;
            }
            raw[[row, 4]] = *score; // person
        }
        raw
    }
}

impl Detector for StubBackend {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn warmup(&mut self) -> Result<()> {
        log::debug!("stub backend {} warmed up", self.info.identifier);
        Ok(())
    }

    fn infer(&mut self, batch: &Array4<f32>) -> Result<Vec<Array2<f32>>> {
        let n = batch.shape()[0];
        Ok((0..n).map(|_| self.predictions()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn person_preset_emits_three_raw_boxes() {
        let mut backend = StubBackend::new("stub://person").expect("backend");
        let batch = Array4::zeros((1, 3, 640, 640));
        let raws = backend.infer(&batch).expect("infer");
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].nrows(), 3);
        assert!(raws[0].iter().any(|v| *v > 0.5));
    }

    #[test]
    fn empty_preset_scores_below_any_real_threshold() {
        let mut backend = StubBackend::new("stub://empty").expect("backend");
        let batch = Array4::zeros((2, 3, 640, 640));
        let raws = backend.infer(&batch).expect("infer");
        assert_eq!(raws.len(), 2);
        for raw in raws {
            for row in raw.rows() {
                for score in row.iter().skip(4) {
                    assert!(*score < 0.05);
                }
            }
        }
    }

    #[test]
    fn non_stub_identifier_is_rejected() {
        assert!(StubBackend::new("model.onnx").is_err());
    }
}
