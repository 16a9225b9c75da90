#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, Array4};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, ModelInfo};

const DEFAULT_INPUT_SIZE: u32 = 640;

/// Tract-based backend for ONNX detection models.
///
/// Loads a local `.onnx` file with a fixed `1x3xHxW` input. Class names are
/// read from a sidecar `<model>.names` file (one name per line) when present;
/// otherwise postprocessing falls back to generated names.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    info: ModelInfo,
}

impl TractBackend {
    pub fn load(identifier: &str) -> Result<Self> {
        Self::load_with_input(identifier, DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }

    pub fn load_with_input(identifier: &str, width: u32, height: u32) -> Result<Self> {
        let model_path = Path::new(identifier);
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let class_names = read_sidecar_names(model_path);

        Ok(Self {
            model,
            info: ModelInfo {
                identifier: identifier.to_string(),
                input_width: width,
                input_height: height,
                class_names,
            },
        })
    }

    fn run_single(&self, batch: &Array4<f32>, index: usize) -> Result<Array2<f32>> {
        let (h, w) = (
            self.info.input_height as usize,
            self.info.input_width as usize,
        );
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            batch[[index, c, y, x]]
        });
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        normalize_output(view.as_slice().unwrap_or(&[]), view.shape())
    }
}

impl Detector for TractBackend {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn warmup(&mut self) -> Result<()> {
        let zeros = Array4::zeros((
            1,
            3,
            self.info.input_height as usize,
            self.info.input_width as usize,
        ));
        self.run_single(&zeros, 0)?;
        log::debug!("tract backend {} warmed up", self.info.identifier);
        Ok(())
    }

    fn infer(&mut self, batch: &Array4<f32>) -> Result<Vec<Array2<f32>>> {
        (0..batch.shape()[0])
            .map(|index| self.run_single(batch, index))
            .collect()
    }
}

/// Accepts `(1, 4+nc, n)` or `(1, n, 4+nc)` layouts and returns `(n, 4+nc)`.
/// YOLO-family exports put the short axis first, so the smaller of the two
/// trailing dims is treated as the attribute axis.
fn normalize_output(data: &[f32], shape: &[usize]) -> Result<Array2<f32>> {
    let (a, b) = match shape {
        [1, a, b] => (*a, *b),
        [a, b] => (*a, *b),
        other => return Err(anyhow!("unexpected model output shape {:?}", other)),
    };
    if data.len() != a * b {
        return Err(anyhow!("model output size does not match its shape"));
    }
    let flat = Array2::from_shape_vec((a, b), data.to_vec())?;
    if a <= b {
        Ok(flat.t().to_owned())
    } else {
        Ok(flat)
    }
}

fn read_sidecar_names(model_path: &Path) -> Vec<String> {
    let names_path: PathBuf = model_path.with_extension("names");
    match std::fs::read_to_string(&names_path) {
        Ok(raw) => raw
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect(),
        Err(_) => {
            log::debug!(
                "no class-name sidecar at {}; using generated names",
                names_path.display()
            );
            Vec::new()
        }
    }
}
