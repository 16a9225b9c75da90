#![cfg(feature = "source-ffmpeg")]

//! FFmpeg-backed frame decoding shared by video and live sources.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

pub(crate) struct FfmpegReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    total_frames: Option<u64>,
    native_fps: Option<f32>,
    eof_sent: bool,
}

impl FfmpegReader {
    pub(crate) fn open(url: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&url)
            .with_context(|| format!("failed to open '{}' with ffmpeg", url))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", url))?;
        let stream_index = stream.index();

        let total_frames = if stream.frames() > 0 {
            Some(stream.frames() as u64)
        } else {
            None
        };
        let rate = stream.avg_frame_rate();
        let native_fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            Some(rate.numerator() as f32 / rate.denominator() as f32)
        } else {
            None
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            total_frames,
            native_fps,
            eof_sent: false,
        })
    }

    pub(crate) fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub(crate) fn native_fps(&self) -> Option<f32> {
        self.native_fps
    }

    /// Decode the next RGB frame. `Ok(None)` means end of stream.
    pub(crate) fn next_rgb(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(self.to_rgb(&decoded)?));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut sent = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                sent = true;
                break;
            }
            if !sent {
                // Demuxer is exhausted; flush the decoder once.
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn to_rgb(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .context("scale frame to RGB")?;

        let width = rgb.width();
        let height = rgb.height();
        let row_bytes = (width as usize) * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);

        let pixels = if stride == row_bytes {
            data[..row_bytes * height as usize].to_vec()
        } else {
            let mut buf = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                buf.extend_from_slice(
                    data.get(start..start + row_bytes)
                        .context("ffmpeg frame row is out of bounds")?,
                );
            }
            buf
        };

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame has inconsistent dimensions"))
    }
}
