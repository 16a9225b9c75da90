//! Single still-image source.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{synthetic_image, Frame, FrameIdent, FrameSource};

pub struct ImageSource {
    path: PathBuf,
    image: Option<Arc<image::RgbImage>>,
}

impl ImageSource {
    pub fn open(identifier: &str) -> Result<Self> {
        let image = if identifier == "stub://image" {
            synthetic_image(640, 480, 1)
        } else {
            image::open(identifier)
                .with_context(|| format!("failed to open image '{}'", identifier))?
                .to_rgb8()
        };
        Ok(Self {
            path: PathBuf::from(identifier),
            image: Some(Arc::new(image)),
        })
    }
}

impl FrameSource for ImageSource {
    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }

    fn is_still_image(&self) -> bool {
        true
    }

    fn total_frames(&self) -> Option<u64> {
        Some(1)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.image.take().map(|image| Frame {
            image,
            ident: FrameIdent::Path(self.path.clone()),
            total_frames: Some(1),
            native_fps: None,
        }))
    }
}
