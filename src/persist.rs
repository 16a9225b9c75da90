//! Persisted detection output.
//!
//! When saving is enabled the writer mirrors the source layout:
//! - still image: one annotated `<stem>.png` next to one `<stem>.txt` label file
//! - video/stream: numbered annotated frames under `frames/` plus one label
//!   file per frame, and a `sequence.json` manifest recording the native
//!   frame rate so the sequence can be re-muxed at original speed.
//!
//! Label lines are `class_id cx cy w h [confidence]` in normalized
//! coordinates, one line per surviving detection.
//!
//! The writer holds directory state, not an open file descriptor, but the
//! loop still treats it as a handle: `finish` must run on every exit path
//! (stop, completion, failure) and is idempotent.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;

use crate::postprocess::Detection;
use crate::source::FrameIdent;

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub save_annotated: bool,
    pub save_labels: bool,
    /// Append the confidence column to label lines.
    pub save_confidence: bool,
}

impl OutputConfig {
    pub fn enabled(&self) -> bool {
        self.save_annotated || self.save_labels
    }
}

#[derive(Serialize)]
struct SequenceManifest<'a> {
    stem: &'a str,
    frames: u64,
    native_fps: Option<f32>,
}

pub struct OutputWriter {
    config: OutputConfig,
    stem: String,
    still: bool,
    native_fps: Option<f32>,
    frames_written: u64,
    open: bool,
}

impl OutputWriter {
    pub fn create(
        config: OutputConfig,
        stem: &str,
        still: bool,
        native_fps: Option<f32>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .with_context(|| format!("failed to create output dir {}", config.dir.display()))?;
        if config.save_labels {
            fs::create_dir_all(config.dir.join("labels")).context("failed to create labels dir")?;
        }
        if config.save_annotated && !still {
            fs::create_dir_all(config.dir.join("frames")).context("failed to create frames dir")?;
        }
        Ok(Self {
            config,
            stem: stem.to_string(),
            still,
            native_fps,
            frames_written: 0,
            open: true,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Persist one frame's artifacts.
    pub fn write(
        &mut self,
        annotated: &RgbImage,
        detections: &[Detection],
        ident: &FrameIdent,
    ) -> Result<()> {
        self.frames_written += 1;
        let frame_stem = self.frame_stem(ident);

        if self.config.save_annotated {
            let path = if self.still {
                self.config.dir.join(format!("{}.png", frame_stem))
            } else {
                self.config
                    .dir
                    .join("frames")
                    .join(format!("{}.png", frame_stem))
            };
            annotated
                .save(&path)
                .with_context(|| format!("failed to save annotated frame {}", path.display()))?;
        }

        if self.config.save_labels {
            let path = self
                .config
                .dir
                .join("labels")
                .join(format!("{}.txt", frame_stem));
            let mut file = fs::File::create(&path)
                .with_context(|| format!("failed to create label file {}", path.display()))?;
            for det in detections {
                writeln!(file, "{}", format_label_line(det, self.config.save_confidence))?;
            }
        }

        Ok(())
    }

    /// Release the writer. Idempotent; writes the sequence manifest once for
    /// multi-frame sessions.
    pub fn finish(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        if !self.still && self.frames_written > 0 {
            let manifest = SequenceManifest {
                stem: &self.stem,
                frames: self.frames_written,
                native_fps: self.native_fps,
            };
            let path = self.config.dir.join("sequence.json");
            let json = serde_json::to_string_pretty(&manifest)?;
            fs::write(&path, json)
                .with_context(|| format!("failed to write manifest {}", path.display()))?;
        }
        log::info!(
            "output writer released: {} frames under {}",
            self.frames_written,
            self.config.dir.display()
        );
        Ok(())
    }

    fn frame_stem(&self, ident: &FrameIdent) -> String {
        if self.still {
            self.stem.clone()
        } else {
            match ident {
                FrameIdent::Index(index) => format!("{}_{:06}", self.stem, index),
                FrameIdent::Path(_) => format!("{}_{:06}", self.stem, self.frames_written),
            }
        }
    }
}

fn format_label_line(det: &Detection, with_confidence: bool) -> String {
    let [cx, cy, w, h] = det.cxcywh_norm;
    if with_confidence {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6} {:.6}",
            det.class_id, cx, cy, w, h, det.confidence
        )
    } else {
        format!("{} {:.6} {:.6} {:.6} {:.6}", det.class_id, cx, cy, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::path::Path;

    fn sample_detection() -> Detection {
        Detection {
            class_id: 0,
            class_name: "person".to_string(),
            confidence: 0.875,
            xyxy: [10, 20, 50, 100],
            cxcywh_norm: [0.25, 0.5, 0.125, 0.25],
        }
    }

    fn config(dir: &Path) -> OutputConfig {
        OutputConfig {
            dir: dir.to_path_buf(),
            save_annotated: true,
            save_labels: true,
            save_confidence: false,
        }
    }

    #[test]
    fn label_line_format_matches_contract() {
        let det = sample_detection();
        assert_eq!(
            format_label_line(&det, false),
            "0 0.250000 0.500000 0.125000 0.250000"
        );
        assert_eq!(
            format_label_line(&det, true),
            "0 0.250000 0.500000 0.125000 0.250000 0.875000"
        );
    }

    #[test]
    fn still_image_writes_single_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            OutputWriter::create(config(dir.path()), "photo", true, None).expect("writer");
        let image = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        writer
            .write(&image, &[sample_detection()], &FrameIdent::Index(1))
            .expect("write");
        writer.finish().expect("finish");

        assert!(dir.path().join("photo.png").exists());
        let labels =
            fs::read_to_string(dir.path().join("labels/photo.txt")).expect("labels file");
        assert_eq!(labels.lines().count(), 1);
        // Stills do not get a sequence manifest.
        assert!(!dir.path().join("sequence.json").exists());
    }

    #[test]
    fn video_frames_are_numbered_and_manifest_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            OutputWriter::create(config(dir.path()), "clip", false, Some(25.0)).expect("writer");
        let image = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        for index in 1..=3 {
            writer
                .write(&image, &[], &FrameIdent::Index(index))
                .expect("write");
        }
        writer.finish().expect("finish");

        assert!(dir.path().join("frames/clip_000001.png").exists());
        assert!(dir.path().join("frames/clip_000003.png").exists());
        let manifest =
            fs::read_to_string(dir.path().join("sequence.json")).expect("manifest file");
        assert!(manifest.contains("\"frames\": 3"));
        assert!(manifest.contains("25.0"));
    }

    #[test]
    fn finish_is_idempotent_and_closes_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            OutputWriter::create(config(dir.path()), "clip", false, None).expect("writer");
        assert!(writer.is_open());
        writer.finish().expect("first finish");
        assert!(!writer.is_open());
        writer.finish().expect("second finish");
    }
}
