//! The streaming inference control loop.
//!
//! One worker thread drives a session: pull a frame, preprocess, infer,
//! postprocess, annotate, persist, emit. A control thread steers the session
//! through [`ControlHandle`], which only touches the shared [`RunParameters`]
//! block and reads the state cell; the worker polls those at the top of every
//! tick. The worker is never preempted mid-frame, so stop and pause take
//! effect at the next frame boundary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::annotate;
use crate::detect::{Detector, ModelLoader};
use crate::events::{
    self, EventReceiver, EventSender, LoopEvent, STATUS_COMPLETED, STATUS_DETECTING,
    STATUS_LOADING_MODEL, STATUS_PAUSED, STATUS_TERMINATED,
};
use crate::params::RunParameters;
use crate::persist::{OutputConfig, OutputWriter};
use crate::postprocess::{ClassCounts, Detection, PostProcessor};
use crate::preprocess;
use crate::source::{self, Frame};
use crate::LoopError;

/// Fps is sampled once per this many consumed frames.
const FPS_SAMPLE_FRAMES: u64 = 5;
/// Poll interval while paused; keeps stop and model-swap responsive.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ----------------------------------------------------------------------------
// Loop state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
    Failed,
}

impl LoopState {
    fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Running => 1,
            LoopState::Paused => 2,
            LoopState::Stopping => 3,
            LoopState::Completed => 4,
            LoopState::Failed => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Paused,
            3 => LoopState::Stopping,
            4 => LoopState::Completed,
            _ => LoopState::Failed,
        }
    }
}

/// Atomic cell holding the current [`LoopState`], shared between the worker
/// and the control surface.
pub struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(LoopState::Idle.as_u8()))
    }

    pub fn load(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, state: LoopState) {
        log::debug!("loop state -> {:?}", state);
        self.0.store(state.as_u8(), Ordering::Relaxed);
    }
}

pub type SharedState = Arc<StateCell>;

// ----------------------------------------------------------------------------
// Per-frame result
// ----------------------------------------------------------------------------

/// Wall-clock cost of each pipeline stage for one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageTimings {
    pub preprocess_ms: f32,
    pub inference_ms: f32,
    pub postprocess_ms: f32,
}

/// Everything produced for one frame.
pub struct FrameResult {
    pub original: Arc<RgbImage>,
    pub annotated: Arc<RgbImage>,
    pub detections: Vec<Detection>,
    pub class_counts: ClassCounts,
    /// Distinct classes in this frame.
    pub class_total: usize,
    /// Total detections in this frame.
    pub target_total: usize,
    /// True when the frame produced zero detections.
    pub no_detections: bool,
    pub timings: StageTimings,
}

// ----------------------------------------------------------------------------
// Control surface
// ----------------------------------------------------------------------------

/// Handle for steering a running loop from another thread. All methods write
/// through the shared parameter block; the worker picks changes up at the
/// next frame boundary.
#[derive(Clone)]
pub struct ControlHandle {
    params: Arc<RunParameters>,
    state: SharedState,
}

impl ControlHandle {
    pub fn state(&self) -> LoopState {
        self.state.load()
    }

    pub fn pause(&self) {
        self.params.set_paused(true);
    }

    pub fn resume(&self) {
        self.params.set_paused(false);
    }

    pub fn stop(&self) {
        self.params.request_stop();
    }

    pub fn set_iou(&self, value: f32) {
        self.params.set_iou(value);
    }

    pub fn set_confidence(&self, value: f32) {
        self.params.set_confidence(value);
    }

    pub fn set_delay_ms(&self, value: u64) {
        self.params.set_delay_ms(value);
    }

    pub fn set_save_flags(&self, annotated: bool, labels: bool) {
        self.params.set_save_flags(annotated, labels);
    }

    pub fn set_save_confidence(&self, value: bool) {
        self.params.set_save_confidence(value);
    }

    /// Swap the active model; takes effect before the next frame.
    pub fn change_model(&self, identifier: &str) {
        self.params.set_model(identifier);
    }

    /// Select the source for the next session. A running session keeps its
    /// current source.
    pub fn change_source(&self, identifier: &str) {
        self.params.set_source(identifier);
    }
}

// ----------------------------------------------------------------------------
// InferenceLoop
// ----------------------------------------------------------------------------

enum SessionEnd {
    Completed,
    Stopped,
}

pub struct InferenceLoop {
    params: Arc<RunParameters>,
    state: SharedState,
    events: EventSender,
    loader: Box<dyn ModelLoader>,
    output_dir: PathBuf,
}

impl InferenceLoop {
    /// Build a loop plus its control handle and event receiver.
    pub fn new(
        params: Arc<RunParameters>,
        loader: Box<dyn ModelLoader>,
        output_dir: PathBuf,
    ) -> (Self, ControlHandle, EventReceiver) {
        let state: SharedState = Arc::new(StateCell::new());
        let (events, receiver) = events::channel();
        let control = ControlHandle {
            params: Arc::clone(&params),
            state: Arc::clone(&state),
        };
        let engine = Self {
            params,
            state,
            events,
            loader,
            output_dir,
        };
        (engine, control, receiver)
    }

    pub fn state(&self) -> LoopState {
        self.state.load()
    }

    /// Run one detection session to completion, stop, or failure.
    ///
    /// Any error is surfaced as a Status event and moves the state to
    /// `Failed` before it is returned; the caller's process stays alive.
    pub fn run(&mut self) -> Result<()> {
        match self.state.load() {
            LoopState::Running | LoopState::Paused | LoopState::Stopping => {
                return Err(LoopError::Configuration(
                    "a detection session is already running".to_string(),
                )
                .into());
            }
            _ => {}
        }
        self.params.clear_stop();
        self.params.set_paused(false);

        let mut writer: Option<OutputWriter> = None;
        let outcome = self.run_session(&mut writer);

        // The writer must be released on every exit path.
        if let Some(writer) = writer.as_mut() {
            if let Err(err) = writer.finish() {
                log::warn!("failed to finalize output: {err:#}");
            }
        }

        match outcome {
            Ok(SessionEnd::Completed) => {
                self.state.store(LoopState::Completed);
                self.events.status(STATUS_COMPLETED);
                Ok(())
            }
            Ok(SessionEnd::Stopped) => {
                self.events.status(STATUS_TERMINATED);
                self.state.store(LoopState::Idle);
                Ok(())
            }
            Err(err) => {
                self.state.store(LoopState::Failed);
                self.events.status(format!("{err:#}"));
                log::error!("detection session failed: {err:#}");
                Err(err)
            }
        }
    }

    fn run_session(&mut self, writer: &mut Option<OutputWriter>) -> Result<SessionEnd> {
        let source_id = self.params.source();
        if source_id.trim().is_empty() {
            return Err(LoopError::Configuration(
                "please select a source before starting detection".to_string(),
            )
            .into());
        }
        let model_id = self.params.model();
        if model_id.trim().is_empty() {
            return Err(LoopError::Configuration(
                "please select a model before starting detection".to_string(),
            )
            .into());
        }

        self.state.store(LoopState::Running);
        self.events.status(STATUS_LOADING_MODEL);
        let mut detector = self.load_model(&model_id)?;

        let mut source = source::open_source(&source_id)
            .map_err(|err| LoopError::SourceOpen(format!("{err:#}")))?;
        let still = source.is_still_image();
        log::info!("session start: model={} source={}", model_id, source.describe());
        self.events.status(STATUS_DETECTING);

        let session_clock = Instant::now();
        let mut fps_clock = Instant::now();
        let mut consumed: u64 = 0;
        let mut detections_total: u64 = 0;
        let mut was_paused = false;

        loop {
            // 1. stop flag wins over everything else.
            if self.params.stop_requested() {
                self.state.store(LoopState::Stopping);
                self.log_summary(consumed, detections_total, session_clock);
                return Ok(SessionEnd::Stopped);
            }

            // 2. model hot-swap, only ever between frames.
            let wanted = self.params.model();
            if !wanted.trim().is_empty() && wanted != detector.info().identifier {
                self.events.status(STATUS_LOADING_MODEL);
                detector = self.load_model(&wanted)?;
                self.events.status(STATUS_DETECTING);
            }

            // 3. pause parks the worker without advancing the source.
            if self.params.paused() {
                if !was_paused {
                    was_paused = true;
                    self.state.store(LoopState::Paused);
                    self.events.status(STATUS_PAUSED);
                }
                thread::sleep(PAUSE_POLL_INTERVAL);
                continue;
            }
            if was_paused {
                was_paused = false;
                self.state.store(LoopState::Running);
                self.events.status(STATUS_DETECTING);
            }

            // 4. pull the next frame.
            let frame = match source
                .next_frame()
                .map_err(|err| LoopError::PerFrame(format!("{err:#}")))?
            {
                Some(frame) => frame,
                None => {
                    self.log_summary(consumed, detections_total, session_clock);
                    return Ok(SessionEnd::Completed);
                }
            };
            consumed += 1;
            let total = frame.total_frames.or_else(|| source.total_frames());

            // 5. fps sample every FPS_SAMPLE_FRAMES consumed frames.
            if consumed % FPS_SAMPLE_FRAMES == 0 {
                let elapsed = fps_clock.elapsed().as_secs_f32();
                if elapsed > 0.0 {
                    let fps = FPS_SAMPLE_FRAMES as f32 / elapsed;
                    self.events
                        .emit(LoopEvent::Fps(format!("{}", fps.round() as i64)));
                }
                fps_clock = Instant::now();
            }

            // 6-8. preprocess, infer, postprocess.
            let result = self
                .process_frame(detector.as_mut(), &frame)
                .map_err(|err| LoopError::PerFrame(format!("{err:#}")))?;
            detections_total += result.target_total as u64;

            // 9. persist and emit.
            self.persist_frame(writer, &source_id, still, &frame, &result)
                .map_err(|err| LoopError::PerFrame(format!("{err:#}")))?;
            self.emit_frame(&result);

            let delay = self.params.delay_ms();
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }

            // 10. progress after the frame is fully handled.
            self.events
                .emit(LoopEvent::Progress(progress_value(consumed, total)));

            // 11. natural completion.
            let finished = still || total.is_some_and(|t| consumed >= t);
            if finished {
                self.log_summary(consumed, detections_total, session_clock);
                return Ok(SessionEnd::Completed);
            }
        }
    }

    fn load_model(&self, identifier: &str) -> Result<Box<dyn Detector>> {
        let mut detector = self
            .loader
            .load(identifier)
            .map_err(|err| LoopError::ModelLoad(format!("{err:#}")))?;
        detector
            .warmup()
            .map_err(|err| LoopError::ModelLoad(format!("warmup failed: {err:#}")))?;
        log::info!(
            "model ready: {} ({}x{}, {} classes)",
            identifier,
            detector.info().input_width,
            detector.info().input_height,
            detector.info().class_names.len()
        );
        Ok(detector)
    }

    fn process_frame(&self, detector: &mut dyn Detector, frame: &Frame) -> Result<FrameResult> {
        // Thresholds are snapshotted here; a concurrent change applies from
        // the next frame on.
        let post = PostProcessor::new(self.params.confidence(), self.params.iou());
        let info = detector.info().clone();

        let clock = Instant::now();
        let (batch, letterboxes) = preprocess::batch_tensor(
            &[frame.image.as_ref()],
            info.input_width,
            info.input_height,
        )?;
        let preprocess_ms = clock.elapsed().as_secs_f32() * 1000.0;

        let clock = Instant::now();
        let raw = detector.infer(&batch)?;
        let inference_ms = clock.elapsed().as_secs_f32() * 1000.0;
        let raw = raw
            .first()
            .ok_or_else(|| anyhow!("backend returned no predictions for the batch"))?;

        let clock = Instant::now();
        let outcome = post.process(raw, &letterboxes[0], &info.class_names);
        let postprocess_ms = clock.elapsed().as_secs_f32() * 1000.0;

        let annotated = annotate::annotate(&frame.image, &outcome.detections);
        log::debug!(
            "{}: pre {:.1}ms infer {:.1}ms post {:.1}ms, {} detections",
            frame.ident.label(),
            preprocess_ms,
            inference_ms,
            postprocess_ms,
            outcome.detections.len()
        );

        Ok(FrameResult {
            original: Arc::clone(&frame.image),
            annotated: Arc::new(annotated),
            class_total: outcome.class_counts.len(),
            target_total: outcome.detections.len(),
            no_detections: outcome.no_detections,
            detections: outcome.detections,
            class_counts: outcome.class_counts,
            timings: StageTimings {
                preprocess_ms,
                inference_ms,
                postprocess_ms,
            },
        })
    }

    fn persist_frame(
        &self,
        writer: &mut Option<OutputWriter>,
        source_id: &str,
        still: bool,
        frame: &Frame,
        result: &FrameResult,
    ) -> Result<()> {
        let config = OutputConfig {
            dir: self.output_dir.clone(),
            save_annotated: self.params.save_annotated(),
            save_labels: self.params.save_labels(),
            save_confidence: self.params.save_confidence(),
        };
        if !config.enabled() {
            return Ok(());
        }
        if writer.is_none() {
            *writer = Some(OutputWriter::create(
                config,
                &session_stem(source_id),
                still,
                frame.native_fps,
            )?);
        }
        if let Some(writer) = writer.as_mut() {
            writer.write(&result.annotated, &result.detections, &frame.ident)?;
        }
        Ok(())
    }

    fn emit_frame(&self, result: &FrameResult) {
        self.events
            .emit(LoopEvent::RawImage(Arc::clone(&result.original)));
        self.events
            .emit(LoopEvent::AnnotatedImage(Arc::clone(&result.annotated)));
        self.events
            .emit(LoopEvent::ClassCounts(result.class_counts.clone()));
        self.events.emit(LoopEvent::ClassTotal(result.class_total));
        self.events.emit(LoopEvent::TargetTotal(result.target_total));
    }

    fn log_summary(&self, consumed: u64, detections_total: u64, session_clock: Instant) {
        let elapsed = session_clock.elapsed().as_secs_f64();
        let mean_fps = if elapsed > 0.0 {
            consumed as f64 / elapsed
        } else {
            0.0
        };
        log::info!(
            "session summary: {} frames, {} detections, {:.1} fps mean",
            consumed,
            detections_total,
            mean_fps
        );
    }
}

/// Progress on a 0..=1000 gauge. An unknown total behaves as total = 1, so
/// the gauge saturates on the first frame of an endless stream.
pub fn progress_value(consumed: u64, total: Option<u64>) -> i32 {
    let total = total.unwrap_or(1).max(1);
    ((consumed * 1000) / total).min(1000) as i32
}

fn session_stem(identifier: &str) -> String {
    let base = Path::new(identifier)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.to_string());
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reaches_exactly_one_thousand() {
        assert_eq!(progress_value(0, Some(100)), 0);
        assert_eq!(progress_value(50, Some(100)), 500);
        assert_eq!(progress_value(100, Some(100)), 1000);
        assert_eq!(progress_value(1, Some(1)), 1000);
    }

    #[test]
    fn progress_saturates_without_a_total() {
        assert_eq!(progress_value(1, None), 1000);
        assert_eq!(progress_value(9999, None), 1000);
    }

    #[test]
    fn progress_never_overshoots() {
        assert_eq!(progress_value(150, Some(100)), 1000);
    }

    #[test]
    fn state_cell_round_trips_every_state() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), LoopState::Idle);
        for state in [
            LoopState::Running,
            LoopState::Paused,
            LoopState::Stopping,
            LoopState::Completed,
            LoopState::Failed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn session_stems_are_filesystem_friendly() {
        assert_eq!(session_stem("/data/videos/walk.mp4"), "walk");
        assert_eq!(session_stem("stub://video/100"), "100");
        assert_eq!(session_stem("camera:0"), "camera_0");
        assert_eq!(session_stem("///"), "session");
    }
}
