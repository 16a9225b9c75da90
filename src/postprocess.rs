//! Postprocessing: candidate decoding, non-max suppression, box rescaling.
//!
//! Raw model output for one image is a `(candidates, 4 + num_classes)` array
//! of `[cx, cy, w, h, class scores...]` rows in model-input pixels. This
//! module filters candidates by confidence, suppresses overlapping boxes,
//! maps survivors back into the original image resolution, and groups them
//! by class in first-seen order.

use ndarray::Array2;
use serde::Serialize;

use crate::preprocess::Letterbox;

/// Default cap on detections kept per frame after suppression.
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

// ----------------------------------------------------------------------------
// Detection and per-frame aggregates
// ----------------------------------------------------------------------------

/// One finalized bounding box. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    /// Absolute pixel corners in the original image: [x_min, y_min, x_max, y_max].
    pub xyxy: [i32; 4],
    /// Normalized center/size relative to the original image: [cx, cy, w, h].
    pub cxcywh_norm: [f32; 4],
}

/// Per-class counts in first-seen order within the frame.
///
/// Classes that did not occur are never present, so "a class with count 0"
/// cannot be represented — absence of all detections is signalled separately
/// by [`FrameOutcome::no_detections`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassCounts(Vec<(String, u32)>);

impl ClassCounts {
    pub fn record(&mut self, class_name: &str) {
        for (name, count) in self.0.iter_mut() {
            if name == class_name {
                *count += 1;
                return;
            }
        }
        self.0.push((class_name.to_string(), 1));
    }

    pub fn get(&self, class_name: &str) -> Option<u32> {
        self.0
            .iter()
            .find(|(name, _)| name == class_name)
            .map(|(_, count)| *count)
    }

    /// Number of distinct classes seen.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of counts across all classes.
    pub fn total(&self) -> u32 {
        self.0.iter().map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

/// Finalized detections for one image.
#[derive(Clone, Debug, Default)]
pub struct FrameOutcome {
    pub detections: Vec<Detection>,
    pub class_counts: ClassCounts,
    /// True when suppression left nothing. Distinct from any class mapping:
    /// an empty mapping plus this flag is the explicit "no detections" signal.
    pub no_detections: bool,
}

impl FrameOutcome {
    fn from_detections(detections: Vec<Detection>) -> Self {
        let mut class_counts = ClassCounts::default();
        for det in &detections {
            class_counts.record(&det.class_name);
        }
        let no_detections = detections.is_empty();
        Self {
            detections,
            class_counts,
            no_detections,
        }
    }
}

// ----------------------------------------------------------------------------
// Candidate boxes in model-input space
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Candidate {
    x_min: f32,
    y_min: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class_id: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        self.width * self.height
    }

    fn intersection_area(&self, other: &Candidate) -> f32 {
        let left = self.x_min.max(other.x_min);
        let right = (self.x_min + self.width).min(other.x_min + other.width);
        let top = self.y_min.max(other.y_min);
        let bottom = (self.y_min + self.height).min(other.y_min + other.height);
        (right - left).max(0.0) * (bottom - top).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

// ----------------------------------------------------------------------------
// PostProcessor
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Suppress across classes instead of per class.
    pub class_agnostic: bool,
    /// When set, only these class ids survive decoding.
    pub allowed_classes: Option<Vec<usize>>,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            class_agnostic: false,
            allowed_classes: None,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }

    /// Process raw predictions for one image.
    ///
    /// `class_names` may be shorter than the model's class axis; missing
    /// entries fall back to a generated `class<N>` name.
    pub fn process(
        &self,
        raw: &Array2<f32>,
        letterbox: &Letterbox,
        class_names: &[String],
    ) -> FrameOutcome {
        let mut candidates = self.decode(raw);
        self.suppress(&mut candidates);
        candidates.truncate(self.max_detections);

        let detections = candidates
            .into_iter()
            .map(|cand| finalize(cand, letterbox, class_names))
            .collect();
        FrameOutcome::from_detections(detections)
    }

    fn decode(&self, raw: &Array2<f32>) -> Vec<Candidate> {
        let columns = raw.ncols();
        if columns < 5 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for row in raw.rows() {
            let (mut best_class, mut best_score) = (0usize, f32::MIN);
            for (idx, score) in row.iter().skip(4).enumerate() {
                if *score > best_score {
                    best_class = idx;
                    best_score = *score;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            if let Some(allowed) = &self.allowed_classes {
                if !allowed.contains(&best_class) {
                    continue;
                }
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            if w <= 0.0 || h <= 0.0 {
                continue;
            }
            candidates.push(Candidate {
                x_min: cx - w / 2.0,
                y_min: cy - h / 2.0,
                width: w,
                height: h,
                confidence: best_score,
                class_id: best_class,
            });
        }
        candidates
    }

    /// Greedy non-max suppression, highest confidence first. A box is dropped
    /// when it overlaps an already-kept box of the same class (any class in
    /// agnostic mode) beyond the IoU threshold.
    fn suppress(&self, candidates: &mut Vec<Candidate>) {
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kept = 0;
        for index in 0..candidates.len() {
            let mut drop = false;
            for prev in 0..kept {
                if !self.class_agnostic && candidates[prev].class_id != candidates[index].class_id {
                    continue;
                }
                if candidates[prev].iou(&candidates[index]) > self.iou_threshold {
                    drop = true;
                    break;
                }
            }
            if !drop {
                candidates.swap(kept, index);
                kept += 1;
            }
        }
        candidates.truncate(kept);
    }
}

/// Map a surviving candidate from model-input space back into the original
/// image, rounding to integer pixels and clamping to the image bounds.
fn finalize(cand: Candidate, letterbox: &Letterbox, class_names: &[String]) -> Detection {
    let orig_w = letterbox.orig_width as f32;
    let orig_h = letterbox.orig_height as f32;

    let unscale_x = |x: f32| ((x - letterbox.pad_x) / letterbox.scale).clamp(0.0, orig_w);
    let unscale_y = |y: f32| ((y - letterbox.pad_y) / letterbox.scale).clamp(0.0, orig_h);

    let x_min = unscale_x(cand.x_min);
    let y_min = unscale_y(cand.y_min);
    let x_max = unscale_x(cand.x_min + cand.width);
    let y_max = unscale_y(cand.y_min + cand.height);

    let cx = (x_min + x_max) / 2.0;
    let cy = (y_min + y_max) / 2.0;
    let w = x_max - x_min;
    let h = y_max - y_min;

    let class_name = class_names
        .get(cand.class_id)
        .cloned()
        .unwrap_or_else(|| format!("class{}", cand.class_id));

    Detection {
        class_id: cand.class_id,
        class_name,
        confidence: cand.confidence,
        xyxy: [
            x_min.round() as i32,
            y_min.round() as i32,
            x_max.round() as i32,
            y_max.round() as i32,
        ],
        cxcywh_norm: [cx / orig_w, cy / orig_h, w / orig_w, h / orig_h],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn identity_letterbox(width: u32, height: u32) -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_width: width,
            orig_height: height,
        }
    }

    // Rows: [cx, cy, w, h, score_person, score_car]
    const NAMES: [&str; 2] = ["person", "car"];

    fn names() -> Vec<String> {
        NAMES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn confidence_floor_is_honored() {
        let raw = arr2(&[
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.0],
            [300.0, 300.0, 40.0, 80.0, 0.2, 0.1],
        ]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 1);
        for det in &outcome.detections {
            assert!(det.confidence >= 0.25);
        }
    }

    #[test]
    fn nms_keeps_two_of_three_person_boxes() {
        // Two heavily overlapping person boxes plus one distinct person box.
        let raw = arr2(&[
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.0],
            [102.0, 101.0, 40.0, 80.0, 0.8, 0.0],
            [400.0, 300.0, 40.0, 80.0, 0.6, 0.0],
        ]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 2);
        assert_eq!(outcome.class_counts.get("person"), Some(2));
        assert_eq!(outcome.class_counts.total(), 2);
        assert!(!outcome.no_detections);
    }

    #[test]
    fn per_class_nms_keeps_overlapping_boxes_of_different_classes() {
        let raw = arr2(&[
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.0],
            [101.0, 100.0, 40.0, 80.0, 0.0, 0.8],
        ]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 2);

        let agnostic = PostProcessor {
            class_agnostic: true,
            ..post
        };
        let outcome = agnostic.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 1);
    }

    #[test]
    fn class_allow_list_filters_candidates() {
        let raw = arr2(&[
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.0],
            [300.0, 300.0, 40.0, 80.0, 0.0, 0.8],
        ]);
        let post = PostProcessor {
            allowed_classes: Some(vec![1]),
            ..PostProcessor::new(0.25, 0.45)
        };
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].class_name, "car");
    }

    #[test]
    fn max_detections_caps_survivors() {
        let mut rows = Vec::new();
        for i in 0..10 {
            rows.push([50.0 + i as f32 * 60.0, 100.0, 40.0, 40.0, 0.9, 0.0]);
        }
        let raw = Array2::from_shape_fn((10, 6), |(r, c)| rows[r][c]);
        let post = PostProcessor {
            max_detections: 4,
            ..PostProcessor::new(0.25, 0.45)
        };
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections.len(), 4);
    }

    #[test]
    fn class_counts_preserve_first_seen_order() {
        let raw = arr2(&[
            [100.0, 100.0, 40.0, 80.0, 0.0, 0.95],
            [300.0, 100.0, 40.0, 80.0, 0.9, 0.0],
            [500.0, 100.0, 40.0, 80.0, 0.0, 0.85],
        ]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        let ordered: Vec<_> = outcome.class_counts.iter().collect();
        // Highest-confidence first, so "car" is first seen.
        assert_eq!(ordered, vec![("car", 2), ("person", 1)]);
    }

    #[test]
    fn empty_frame_sets_no_detections_marker() {
        let raw = arr2(&[[100.0, 100.0, 40.0, 80.0, 0.01, 0.02]]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert!(outcome.no_detections);
        assert!(outcome.class_counts.is_empty());
        assert_eq!(outcome.class_counts.get("person"), None);
    }

    #[test]
    fn boxes_are_rescaled_through_the_letterbox() {
        // 1280x720 image letterboxed into 640x640: scale 0.5, pad_y 140.
        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 140.0,
            orig_width: 1280,
            orig_height: 720,
        };
        let raw = arr2(&[[320.0, 320.0, 100.0, 100.0, 0.9, 0.0]]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &letterbox, &names());
        let det = &outcome.detections[0];
        // cx 320 -> 640, cy (320-140)/0.5 = 360, w/h 100 -> 200.
        assert_eq!(det.xyxy, [540, 260, 740, 460]);
        assert!((det.cxcywh_norm[0] - 0.5).abs() < 1e-6);
        assert!((det.cxcywh_norm[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn boxes_are_clamped_to_image_bounds() {
        let raw = arr2(&[[10.0, 10.0, 60.0, 60.0, 0.9, 0.0]]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        let det = &outcome.detections[0];
        assert_eq!(det.xyxy[0], 0);
        assert_eq!(det.xyxy[1], 0);
    }

    #[test]
    fn unknown_class_ids_get_generated_names() {
        let raw = arr2(&[[100.0, 100.0, 40.0, 80.0, 0.0, 0.0, 0.9]]);
        let post = PostProcessor::new(0.25, 0.45);
        let outcome = post.process(&raw, &identity_letterbox(640, 640), &names());
        assert_eq!(outcome.detections[0].class_name, "class2");
    }
}
