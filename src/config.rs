//! Session configuration.
//!
//! Configuration is layered: built-in defaults, then a TOML file named by the
//! `DETECT_CONFIG` env var, then individual `DETECT_*` env overrides, then
//! validation. The resolved config seeds a [`RunParameters`] block before a
//! session starts; after that the control surface owns the parameters.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::params::RunParameters;

const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_DELAY_MS: u64 = 10;
const DEFAULT_OUTPUT_DIR: &str = "detect-output";

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    source: Option<String>,
    model: Option<String>,
    iou: Option<f32>,
    confidence: Option<f32>,
    delay_ms: Option<u64>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    save_annotated: Option<bool>,
    save_labels: Option<bool>,
    save_confidence: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub source: String,
    pub model: String,
    pub iou: f32,
    pub confidence: f32,
    pub delay_ms: u64,
    pub output_dir: PathBuf,
    pub save_annotated: bool,
    pub save_labels: bool,
    pub save_confidence: bool,
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SessionConfigFile) -> Self {
        let output = file.output.unwrap_or_default();
        Self {
            source: file.source.unwrap_or_default(),
            model: file.model.unwrap_or_default(),
            iou: file.iou.unwrap_or(DEFAULT_IOU),
            confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            delay_ms: file.delay_ms.unwrap_or(DEFAULT_DELAY_MS),
            output_dir: output
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            save_annotated: output.save_annotated.unwrap_or(false),
            save_labels: output.save_labels.unwrap_or(false),
            save_confidence: output.save_confidence.unwrap_or(false),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("DETECT_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(model) = std::env::var("DETECT_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(iou) = std::env::var("DETECT_IOU") {
            self.iou = iou
                .parse()
                .map_err(|_| anyhow!("DETECT_IOU must be a float in [0, 1]"))?;
        }
        if let Ok(confidence) = std::env::var("DETECT_CONF") {
            self.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("DETECT_CONF must be a float in [0, 1]"))?;
        }
        if let Ok(delay) = std::env::var("DETECT_DELAY_MS") {
            self.delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("DETECT_DELAY_MS must be an integer number of ms"))?;
        }
        if let Ok(dir) = std::env::var("DETECT_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.iou) {
            return Err(anyhow!("iou threshold {} is outside [0, 1]", self.iou));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence
            ));
        }
        Ok(())
    }

    /// Seed a parameter block with this configuration.
    pub fn apply_to(&self, params: &RunParameters) {
        params.set_source(&self.source);
        params.set_model(&self.model);
        params.set_iou(self.iou);
        params.set_confidence(self.confidence);
        params.set_delay_ms(self.delay_ms);
        params.set_save_flags(self.save_annotated, self.save_labels);
        params.set_save_confidence(self.save_confidence);
    }
}

fn read_config_file(path: &Path) -> Result<SessionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = SessionConfig::from_file(SessionConfigFile::default());
        assert_eq!(cfg.iou, 0.45);
        assert_eq!(cfg.confidence, 0.25);
        assert_eq!(cfg.delay_ms, 10);
        assert_eq!(cfg.output_dir, PathBuf::from("detect-output"));
        assert!(!cfg.save_annotated);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let file: SessionConfigFile = toml::from_str(
            r#"
            source = "stub://video/50"
            model = "stub://person"
            confidence = 0.5

            [output]
            dir = "/tmp/out"
            save_labels = true
            "#,
        )
        .expect("parse");
        let cfg = SessionConfig::from_file(file);
        assert_eq!(cfg.source, "stub://video/50");
        assert_eq!(cfg.model, "stub://person");
        assert_eq!(cfg.confidence, 0.5);
        assert_eq!(cfg.iou, 0.45);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert!(cfg.save_labels);
        assert!(!cfg.save_annotated);
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let mut cfg = SessionConfig::from_file(SessionConfigFile::default());
        cfg.iou = 1.5;
        assert!(cfg.validate().is_err());
        cfg.iou = 0.5;
        cfg.confidence = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn apply_to_seeds_the_parameter_block() {
        let mut cfg = SessionConfig::from_file(SessionConfigFile::default());
        cfg.source = "stub://image".to_string();
        cfg.model = "stub://person".to_string();
        cfg.confidence = 0.6;
        cfg.save_labels = true;

        let params = RunParameters::new();
        cfg.apply_to(&params);
        assert_eq!(params.source(), "stub://image");
        assert_eq!(params.model(), "stub://person");
        assert_eq!(params.confidence(), 0.6);
        assert!(params.save_labels());
        assert!(!params.save_annotated());
    }
}
