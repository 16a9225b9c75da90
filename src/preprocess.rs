//! Frame preprocessing.
//!
//! Frames are letterboxed into the model's input resolution (aspect ratio
//! preserved, gray padding), converted from interleaved u8 RGB to planar f32
//! CHW in [0, 1], and stacked into a batch tensor. The letterbox geometry is
//! returned alongside the tensor so postprocessing can map boxes back into
//! the original image.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Pad color used outside the scaled image, matching common detector training.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Geometry of one letterboxed image.
#[derive(Clone, Copy, Debug)]
pub struct Letterbox {
    /// Uniform scale applied to the original image.
    pub scale: f32,
    /// Horizontal padding (model-input pixels) on the left edge.
    pub pad_x: f32,
    /// Vertical padding (model-input pixels) on the top edge.
    pub pad_y: f32,
    pub orig_width: u32,
    pub orig_height: u32,
}

/// Letterbox a batch of frames into an `(n, 3, height, width)` tensor.
pub fn batch_tensor(
    images: &[&RgbImage],
    input_width: u32,
    input_height: u32,
) -> Result<(Array4<f32>, Vec<Letterbox>)> {
    if images.is_empty() {
        return Err(anyhow!("preprocess called with an empty batch"));
    }
    if input_width == 0 || input_height == 0 {
        return Err(anyhow!(
            "model input size {}x{} is invalid",
            input_width,
            input_height
        ));
    }

    let mut tensor = Array4::from_elem(
        (
            images.len(),
            3,
            input_height as usize,
            input_width as usize,
        ),
        PAD_VALUE,
    );
    let mut boxes = Vec::with_capacity(images.len());

    for (index, image) in images.iter().enumerate() {
        let letterbox = fit(image.width(), image.height(), input_width, input_height)?;
        let scaled_w = ((image.width() as f32) * letterbox.scale).round() as u32;
        let scaled_h = ((image.height() as f32) * letterbox.scale).round() as u32;
        let resized = imageops::resize(
            *image,
            scaled_w.max(1),
            scaled_h.max(1),
            imageops::FilterType::Triangle,
        );

        let offset_x = letterbox.pad_x.round() as usize;
        let offset_y = letterbox.pad_y.round() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = x as usize + offset_x;
            let ty = y as usize + offset_y;
            if tx >= input_width as usize || ty >= input_height as usize {
                continue;
            }
            for channel in 0..3 {
                tensor[[index, channel, ty, tx]] = pixel.0[channel] as f32 / 255.0;
            }
        }
        boxes.push(letterbox);
    }

    Ok((tensor, boxes))
}

fn fit(orig_w: u32, orig_h: u32, input_w: u32, input_h: u32) -> Result<Letterbox> {
    if orig_w == 0 || orig_h == 0 {
        return Err(anyhow!("frame has zero dimension {}x{}", orig_w, orig_h));
    }
    let scale = (input_w as f32 / orig_w as f32).min(input_h as f32 / orig_h as f32);
    let scaled_w = (orig_w as f32 * scale).round();
    let scaled_h = (orig_h as f32 * scale).round();
    Ok(Letterbox {
        scale,
        pad_x: (input_w as f32 - scaled_w) / 2.0,
        pad_y: (input_h as f32 - scaled_h) / 2.0,
        orig_width: orig_w,
        orig_height: orig_h,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn square_image_fills_square_input() {
        let image = solid(320, 320, 255);
        let (tensor, boxes) = batch_tensor(&[&image], 640, 640).expect("tensor");
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        let lb = &boxes[0];
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 0.0);
        // Center pixel comes from the image, not the pad.
        assert!((tensor[[0, 0, 320, 320]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wide_image_is_padded_vertically() {
        let image = solid(1280, 720, 200);
        let (tensor, boxes) = batch_tensor(&[&image], 640, 640).expect("tensor");
        let lb = &boxes[0];
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert!((lb.pad_y - 140.0).abs() < 1e-6);
        // Top rows are pad, middle rows are image.
        assert!((tensor[[0, 0, 0, 0]] - PAD_VALUE).abs() < 1e-6);
        assert!((tensor[[0, 0, 320, 320]] - 200.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn values_are_normalized_to_unit_range() {
        let image = solid(64, 64, 128);
        let (tensor, _) = batch_tensor(&[&image], 64, 64).expect("tensor");
        for value in tensor.iter() {
            assert!((0.0..=1.0).contains(value));
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(batch_tensor(&[], 640, 640).is_err());
    }
}
