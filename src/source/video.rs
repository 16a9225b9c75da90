//! Local video file source.
//!
//! `stub://video/<frames>` selects a synthetic in-memory clip (used by tests
//! and demos); real files decode through FFmpeg behind the `source-ffmpeg`
//! feature.

#[cfg(feature = "source-ffmpeg")]
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(not(feature = "source-ffmpeg"))]
use anyhow::anyhow;
use anyhow::Result;

use super::{synthetic_image, Frame, FrameIdent, FrameSource};

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_FPS: f32 = 25.0;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 100;

pub struct VideoSource {
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticVideo),
    #[cfg(feature = "source-ffmpeg")]
    Ffmpeg(FfmpegVideo),
}

impl VideoSource {
    pub fn open(identifier: &str) -> Result<Self> {
        if let Some(rest) = identifier.strip_prefix("stub://video") {
            let frames = rest
                .strip_prefix('/')
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(DEFAULT_SYNTHETIC_FRAMES);
            return Ok(Self {
                backend: VideoBackend::Synthetic(SyntheticVideo::new(identifier, frames)),
            });
        }

        #[cfg(feature = "source-ffmpeg")]
        {
            Ok(Self {
                backend: VideoBackend::Ffmpeg(FfmpegVideo::open(identifier)?),
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

impl FrameSource for VideoSource {
    fn describe(&self) -> String {
        match &self.backend {
            VideoBackend::Synthetic(video) => format!("video {} (synthetic)", video.identifier),
            #[cfg(feature = "source-ffmpeg")]
            VideoBackend::Ffmpeg(video) => format!("video {}", video.path.display()),
        }
    }

    fn is_still_image(&self) -> bool {
        false
    }

    fn total_frames(&self) -> Option<u64> {
        match &self.backend {
            VideoBackend::Synthetic(video) => Some(video.total_frames),
            #[cfg(feature = "source-ffmpeg")]
            VideoBackend::Ffmpeg(video) => video.total_frames,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            VideoBackend::Synthetic(video) => Ok(video.next_frame()),
            #[cfg(feature = "source-ffmpeg")]
            VideoBackend::Ffmpeg(video) => video.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://video/<frames>)
// ----------------------------------------------------------------------------

struct SyntheticVideo {
    identifier: String,
    total_frames: u64,
    cursor: u64,
}

impl SyntheticVideo {
    fn new(identifier: &str, total_frames: u64) -> Self {
        log::info!(
            "VideoSource: {} frames from {} (synthetic)",
            total_frames,
            identifier
        );
        Self {
            identifier: identifier.to_string(),
            total_frames,
            cursor: 0,
        }
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.cursor >= self.total_frames {
            return None;
        }
        self.cursor += 1;
        Some(Frame {
            image: Arc::new(synthetic_image(
                SYNTHETIC_WIDTH,
                SYNTHETIC_HEIGHT,
                self.cursor,
            )),
            ident: FrameIdent::Index(self.cursor),
            total_frames: Some(self.total_frames),
            native_fps: Some(SYNTHETIC_FPS),
        })
    }
}

// ----------------------------------------------------------------------------
// FFmpeg-backed file decoding
// ----------------------------------------------------------------------------

#[cfg(feature = "source-ffmpeg")]
struct FfmpegVideo {
    path: PathBuf,
    reader: super::ffmpeg_reader::FfmpegReader,
    total_frames: Option<u64>,
    native_fps: Option<f32>,
}

#[cfg(feature = "source-ffmpeg")]
impl FfmpegVideo {
    fn open(identifier: &str) -> Result<Self> {
        let reader = super::ffmpeg_reader::FfmpegReader::open(identifier)?;
        let total_frames = reader.total_frames();
        let native_fps = reader.native_fps();
        log::info!(
            "VideoSource: opened {} (frames={:?}, fps={:?})",
            identifier,
            total_frames,
            native_fps
        );
        Ok(Self {
            path: PathBuf::from(identifier),
            reader,
            total_frames,
            native_fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.reader.next_rgb()? else {
            return Ok(None);
        };
        Ok(Some(Frame {
            image: Arc::new(image),
            ident: FrameIdent::Path(self.path.clone()),
            total_frames: self.total_frames,
            native_fps: self.native_fps,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_video_reports_its_length() {
        let mut source = VideoSource::open("stub://video/3").expect("source");
        assert!(!source.is_still_image());
        assert_eq!(source.total_frames(), Some(3));

        let mut seen = 0;
        while let Some(frame) = source.next_frame().expect("frame") {
            seen += 1;
            assert_eq!(frame.total_frames, Some(3));
            assert_eq!(frame.native_fps, Some(25.0));
            assert_eq!(frame.ident, FrameIdent::Index(seen));
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn synthetic_video_defaults_to_one_hundred_frames() {
        let source = VideoSource::open("stub://video").expect("source");
        assert_eq!(source.total_frames(), Some(100));
    }
}
