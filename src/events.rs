//! Typed result events.
//!
//! The inference loop is the producer; display/recording sinks subscribe to a
//! channel and the loop never holds a reference to sink state. Emission never
//! blocks: the channel is unbounded and a disconnected receiver is ignored,
//! so a slow or dead sink cannot stall the worker thread. Pacing is done by
//! the configured throttle delay, not by backpressure.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;

use crate::postprocess::ClassCounts;

/// Status strings are the observable protocol on the status channel; sinks
/// key off them, so they are fixed here rather than formatted ad hoc.
pub const STATUS_LOADING_MODEL: &str = "Loading model...";
pub const STATUS_DETECTING: &str = "Detecting...";
pub const STATUS_PAUSED: &str = "Pause...";
pub const STATUS_TERMINATED: &str = "Detection terminated";
pub const STATUS_COMPLETED: &str = "Detection completed";

#[derive(Clone, Debug)]
pub enum LoopEvent {
    /// Original frame, before detection.
    RawImage(Arc<RgbImage>),
    /// Frame with detection boxes drawn.
    AnnotatedImage(Arc<RgbImage>),
    /// Human-readable status line (also carries error text on failure).
    Status(String),
    /// Instantaneous frames-per-second, sampled every 5 consumed frames.
    Fps(String),
    /// Per-class detection counts for one frame, first-seen order.
    ClassCounts(ClassCounts),
    /// Number of distinct classes detected in one frame.
    ClassTotal(usize),
    /// Total detections in one frame.
    TargetTotal(usize),
    /// Session progress in [0, 1000].
    Progress(i32),
}

pub type EventReceiver = Receiver<LoopEvent>;

/// Sending half handed to the inference loop.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<LoopEvent>,
}

impl EventSender {
    /// Emit an event. Never blocks; a disconnected sink is not an error.
    pub fn emit(&self, event: LoopEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(LoopEvent::Status(message.into()));
    }
}

/// Create the event channel for one detection session.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, rx)
}
