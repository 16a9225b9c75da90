//! detect-stream: a streaming object-detection inference engine.
//!
//! The core is an inference control loop that pulls frames from a source
//! (still image, video file, or live stream), runs a detector backend over
//! them, postprocesses the raw predictions (confidence filter, per-class NMS,
//! box rescaling), and emits typed events to subscribed sinks. A control
//! thread steers a running session through a shared parameter block: pause,
//! resume, stop, threshold changes, and model hot-swap all take effect at
//! frame boundaries.
//!
//! # Module structure
//!
//! - `source`: frame sources and identifier classification
//! - `detect`: detector backends and model loading
//! - `preprocess` / `postprocess`: letterboxing and NMS + rescaling
//! - `engine`: the inference loop state machine and control surface
//! - `events`: the typed event channel
//! - `annotate` / `persist`: box drawing and on-disk artifacts
//! - `params` / `config`: shared run parameters and layered configuration

pub mod annotate;
pub mod config;
pub mod detect;
pub mod engine;
pub mod events;
pub mod params;
pub mod persist;
pub mod postprocess;
pub mod preprocess;
pub mod source;

pub use config::SessionConfig;
pub use detect::{DefaultLoader, Detector, ModelInfo, ModelLoader, StubBackend};
pub use engine::{
    progress_value, ControlHandle, FrameResult, InferenceLoop, LoopState, StageTimings,
};
pub use events::{EventReceiver, EventSender, LoopEvent};
pub use params::RunParameters;
pub use persist::{OutputConfig, OutputWriter};
pub use postprocess::{ClassCounts, Detection, FrameOutcome, PostProcessor};
pub use source::{open_source, Frame, FrameIdent, FrameSource, SourceKind};

/// Error taxonomy for the inference loop. Converts into `anyhow::Error` and
/// is always surfaced to sinks as a Status event, never a panic.
#[derive(Clone, Debug)]
pub enum LoopError {
    /// Missing or contradictory session setup (no source, no model, ...).
    Configuration(String),
    SourceOpen(String),
    ModelLoad(String),
    /// Decode, inference, or persistence failure on a single frame;
    /// terminates the session without retry.
    PerFrame(String),
}

impl std::fmt::Display for LoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopError::Configuration(msg) => write!(f, "{msg}"),
            LoopError::SourceOpen(msg) => write!(f, "failed to open source: {msg}"),
            LoopError::ModelLoad(msg) => write!(f, "failed to load model: {msg}"),
            LoopError::PerFrame(msg) => write!(f, "frame processing failed: {msg}"),
        }
    }
}

impl std::error::Error for LoopError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_errors_carry_their_message() {
        let err = LoopError::Configuration("please select a source".to_string());
        assert_eq!(err.to_string(), "please select a source");

        let err: anyhow::Error = LoopError::ModelLoad("bad identifier".to_string()).into();
        assert!(err.to_string().contains("bad identifier"));
    }
}
