//! Live camera / network stream source.
//!
//! Live sources have no known total frame count; the loop's progress gauge
//! saturates immediately and the session runs until stopped or the stream
//! ends. `camera:<n>` maps to the local V4L2 device node and RTSP/HTTP URLs
//! open directly; both decode through FFmpeg behind the `source-ffmpeg`
//! feature. `stub://live` is an endless synthetic stream with per-frame
//! noise, paced at a fixed rate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
#[cfg(not(feature = "source-ffmpeg"))]
use anyhow::anyhow;
use rand::Rng;

use super::{synthetic_image, Frame, FrameIdent, FrameSource};

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
/// Pacing for the synthetic stream, roughly 40 fps.
const SYNTHETIC_FRAME_INTERVAL: Duration = Duration::from_millis(25);

pub struct LiveSource {
    backend: LiveBackend,
}

enum LiveBackend {
    Synthetic(SyntheticLive),
    #[cfg(feature = "source-ffmpeg")]
    Ffmpeg(FfmpegLive),
}

impl LiveSource {
    pub fn open(identifier: &str) -> Result<Self> {
        if identifier == "stub://live" {
            return Ok(Self {
                backend: LiveBackend::Synthetic(SyntheticLive::new()),
            });
        }

        #[cfg(feature = "source-ffmpeg")]
        {
            let url = if let Some(index) = identifier.strip_prefix("camera:") {
                format!("/dev/video{}", index)
            } else {
                identifier.to_string()
            };
            let reader = super::ffmpeg_reader::FfmpegReader::open(&url)?;
            log::info!("LiveSource: opened {}", identifier);
            Ok(Self {
                backend: LiveBackend::Ffmpeg(FfmpegLive {
                    identifier: identifier.to_string(),
                    reader,
                    frame_index: 0,
                }),
            })
        }
        #[cfg(not(feature = "source-ffmpeg"))]
        {
            Err(anyhow!(
                "opening '{}' requires the source-ffmpeg feature",
                identifier
            ))
        }
    }
}

impl FrameSource for LiveSource {
    fn describe(&self) -> String {
        match &self.backend {
            LiveBackend::Synthetic(_) => "live stub://live (synthetic)".to_string(),
            #[cfg(feature = "source-ffmpeg")]
            LiveBackend::Ffmpeg(live) => format!("live {}", live.identifier),
        }
    }

    fn is_still_image(&self) -> bool {
        false
    }

    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            LiveBackend::Synthetic(live) => Ok(Some(live.next_frame())),
            #[cfg(feature = "source-ffmpeg")]
            LiveBackend::Ffmpeg(live) => live.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic endless stream (stub://live)
// ----------------------------------------------------------------------------

struct SyntheticLive {
    frame_index: u64,
}

impl SyntheticLive {
    fn new() -> Self {
        log::info!("LiveSource: connected to stub://live (synthetic)");
        Self { frame_index: 0 }
    }

    fn next_frame(&mut self) -> Frame {
        std::thread::sleep(SYNTHETIC_FRAME_INTERVAL);
        self.frame_index += 1;

        let mut image = synthetic_image(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, self.frame_index);
        // Sprinkle noise so consecutive frames differ like a real sensor.
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let x = rng.gen_range(0..SYNTHETIC_WIDTH);
            let y = rng.gen_range(0..SYNTHETIC_HEIGHT);
            image.put_pixel(x, y, image::Rgb([rng.gen(), rng.gen(), rng.gen()]));
        }

        Frame {
            image: Arc::new(image),
            ident: FrameIdent::Index(self.frame_index),
            total_frames: None,
            native_fps: None,
        }
    }
}

// ----------------------------------------------------------------------------
// FFmpeg-backed capture (camera:<n>, rtsp://, ...)
// ----------------------------------------------------------------------------

#[cfg(feature = "source-ffmpeg")]
struct FfmpegLive {
    identifier: String,
    reader: super::ffmpeg_reader::FfmpegReader,
    frame_index: u64,
}

#[cfg(feature = "source-ffmpeg")]
impl FfmpegLive {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.reader.next_rgb()? else {
            return Ok(None);
        };
        self.frame_index += 1;
        Ok(Some(Frame {
            image: Arc::new(image),
            ident: FrameIdent::Index(self.frame_index),
            total_frames: None,
            native_fps: self.reader.native_fps(),
        }))
    }
}
