//! Shared run parameters.
//!
//! One `RunParameters` block is shared between the control thread and the
//! worker thread that drives the inference loop. Every field is independently
//! atomic: the worker reads each field fresh on every tick, and the control
//! thread may overwrite any field at any time. There is deliberately no
//! cross-field snapshot — a tick may observe a new confidence threshold next
//! to an old IoU threshold, and that is acceptable. No field participates in
//! a compound invariant with another.
//!
//! Scalars are plain atomics (floats stored as bit patterns). The model and
//! source identifiers are whole-string swaps behind a mutex; the worker only
//! ever clones them out, so the lock is held for nanoseconds and cannot
//! deadlock against the control thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_DELAY_MS: u64 = 10;

pub struct RunParameters {
    iou_bits: AtomicU32,
    confidence_bits: AtomicU32,
    delay_ms: AtomicU64,
    stop_requested: AtomicBool,
    paused: AtomicBool,
    save_annotated: AtomicBool,
    save_labels: AtomicBool,
    save_confidence: AtomicBool,
    model: Mutex<String>,
    source: Mutex<String>,
}

impl RunParameters {
    pub fn new() -> Self {
        Self {
            iou_bits: AtomicU32::new(DEFAULT_IOU.to_bits()),
            confidence_bits: AtomicU32::new(DEFAULT_CONFIDENCE.to_bits()),
            delay_ms: AtomicU64::new(DEFAULT_DELAY_MS),
            stop_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            save_annotated: AtomicBool::new(false),
            save_labels: AtomicBool::new(false),
            save_confidence: AtomicBool::new(false),
            model: Mutex::new(String::new()),
            source: Mutex::new(String::new()),
        }
    }

    pub fn iou(&self) -> f32 {
        f32::from_bits(self.iou_bits.load(Ordering::Relaxed))
    }

    /// Values outside [0, 1] are clamped; a threshold is meaningless beyond that range.
    pub fn set_iou(&self, value: f32) {
        self.iou_bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn confidence(&self) -> f32 {
        f32::from_bits(self.confidence_bits.load(Ordering::Relaxed))
    }

    pub fn set_confidence(&self, value: f32) {
        self.confidence_bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Inter-frame throttle delay in milliseconds. Zero disables the throttle.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::Relaxed)
    }

    pub fn set_delay_ms(&self, value: u64) {
        self.delay_ms.store(value, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    /// Cleared by the control surface before a new session starts.
    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Relaxed);
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, value: bool) {
        self.paused.store(value, Ordering::Relaxed);
    }

    pub fn save_annotated(&self) -> bool {
        self.save_annotated.load(Ordering::Relaxed)
    }

    pub fn save_labels(&self) -> bool {
        self.save_labels.load(Ordering::Relaxed)
    }

    pub fn save_confidence(&self) -> bool {
        self.save_confidence.load(Ordering::Relaxed)
    }

    pub fn set_save_flags(&self, annotated: bool, labels: bool) {
        self.save_annotated.store(annotated, Ordering::Relaxed);
        self.save_labels.store(labels, Ordering::Relaxed);
    }

    pub fn set_save_confidence(&self, value: bool) {
        self.save_confidence.store(value, Ordering::Relaxed);
    }

    pub fn model(&self) -> String {
        lock_ignore_poison(&self.model).clone()
    }

    pub fn set_model(&self, identifier: &str) {
        *lock_ignore_poison(&self.model) = identifier.to_string();
    }

    pub fn source(&self) -> String {
        lock_ignore_poison(&self.source).clone()
    }

    pub fn set_source(&self, identifier: &str) {
        *lock_ignore_poison(&self.source) = identifier.to_string();
    }
}

impl Default for RunParameters {
    fn default() -> Self {
        Self::new()
    }
}

// The guarded value is a plain String; a panic mid-assignment cannot leave it
// torn, so a poisoned lock is still safe to read.
fn lock_ignore_poison<'a>(mutex: &'a Mutex<String>) -> MutexGuard<'a, String> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defaults_match_session_defaults() {
        let params = RunParameters::new();
        assert_eq!(params.iou(), 0.45);
        assert_eq!(params.confidence(), 0.25);
        assert_eq!(params.delay_ms(), 10);
        assert!(!params.stop_requested());
        assert!(!params.paused());
        assert!(params.model().is_empty());
        assert!(params.source().is_empty());
    }

    #[test]
    fn thresholds_are_clamped() {
        let params = RunParameters::new();
        params.set_iou(1.7);
        params.set_confidence(-0.3);
        assert_eq!(params.iou(), 1.0);
        assert_eq!(params.confidence(), 0.0);
    }

    #[test]
    fn stop_flag_round_trip() {
        let params = RunParameters::new();
        params.request_stop();
        assert!(params.stop_requested());
        params.clear_stop();
        assert!(!params.stop_requested());
    }

    #[test]
    fn writes_from_another_thread_become_visible() {
        let params = Arc::new(RunParameters::new());
        let writer = Arc::clone(&params);
        let handle = std::thread::spawn(move || {
            writer.set_confidence(0.6);
            writer.set_model("stub://person");
            writer.set_paused(true);
        });
        handle.join().expect("writer thread");
        assert_eq!(params.confidence(), 0.6);
        assert_eq!(params.model(), "stub://person");
        assert!(params.paused());
    }
}
