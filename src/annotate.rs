//! Box drawing for annotated output frames.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::postprocess::Detection;

/// Color palette cycled by class id.
const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [72, 249, 10],
    [26, 147, 52],
    [61, 219, 134],
    [0, 212, 187],
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Draw detection boxes onto a copy of the original frame.
pub fn annotate(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut annotated = image.clone();
    for det in detections {
        draw_detection(&mut annotated, det);
    }
    annotated
}

fn draw_detection(image: &mut RgbImage, det: &Detection) {
    let [x_min, y_min, x_max, y_max] = det.xyxy;
    let width = (x_max - x_min).max(1) as u32;
    let height = (y_max - y_min).max(1) as u32;
    let color = class_color(det.class_id);

    // Two nested rectangles give a 2px border.
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), color);
    if width > 2 && height > 2 {
        draw_hollow_rect_mut(
            image,
            Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2),
            color,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(xyxy: [i32; 4], class_id: usize) -> Detection {
        Detection {
            class_id,
            class_name: "person".to_string(),
            confidence: 0.9,
            xyxy,
            cxcywh_norm: [0.5, 0.5, 0.1, 0.1],
        }
    }

    #[test]
    fn boxes_change_border_pixels_only() {
        let image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let annotated = annotate(&image, &[detection([20, 20, 60, 60], 0)]);
        assert_eq!(*annotated.get_pixel(20, 20), class_color(0));
        assert_eq!(*annotated.get_pixel(40, 40), Rgb([0, 0, 0]));
        // Original untouched.
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let image = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let _ = annotate(&image, &[detection([5, 5, 5, 5], 3)]);
    }
}
