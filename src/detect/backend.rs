use anyhow::Result;
use ndarray::{Array2, Array4};

/// Static description of a loaded model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Identifier the model was loaded from; hot-swap compares against this.
    pub identifier: String,
    pub input_width: u32,
    pub input_height: u32,
    /// Class-id -> name. May be shorter than the model's class axis;
    /// postprocessing generates fallback names for the tail.
    pub class_names: Vec<String>,
}

/// Detector backend trait.
///
/// `infer` takes a preprocessed `(n, 3, h, w)` batch in [0, 1] and returns,
/// per image, a `(candidates, 4 + num_classes)` array of
/// `[cx, cy, w, h, class scores...]` rows in model-input pixels.
///
/// A call may block indefinitely; the loop never interrupts an in-flight
/// inference, so a hung backend hangs the worker thread.
pub trait Detector: Send {
    fn info(&self) -> &ModelInfo;

    /// Optional warm-up pass before the first real frame.
    fn warmup(&mut self) -> Result<()> {
        Ok(())
    }

    fn infer(&mut self, batch: &Array4<f32>) -> Result<Vec<Array2<f32>>>;
}
