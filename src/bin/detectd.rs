//! detectd - headless streaming detection runner
//!
//! Loads a session configuration (TOML file + env + CLI flags), starts the
//! inference loop on a worker thread, and logs the event stream. SIGINT maps
//! to a cooperative stop, so the session always ends through the loop's own
//! shutdown path (writer released, summary logged).

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use detect_stream::{
    DefaultLoader, InferenceLoop, LoopEvent, RunParameters, SessionConfig,
};

#[derive(Parser, Debug)]
#[command(name = "detectd", version, about = "Headless streaming object detection")]
struct Args {
    /// Source identifier: file path, camera:<n>, rtsp:// URL, or stub://...
    #[arg(long)]
    source: Option<String>,

    /// Model identifier: .onnx path or stub://...
    #[arg(long)]
    model: Option<String>,

    /// Confidence threshold in [0, 1]
    #[arg(long)]
    conf: Option<f32>,

    /// IoU threshold in [0, 1]
    #[arg(long)]
    iou: Option<f32>,

    /// Inter-frame throttle delay in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Directory for persisted output
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Save annotated frames
    #[arg(long)]
    save_annotated: bool,

    /// Save per-frame label files
    #[arg(long)]
    save_labels: bool,

    /// Include the confidence column in label files
    #[arg(long)]
    save_conf: bool,

    /// Config file path (overrides the DETECT_CONFIG env var)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("DETECT_CONFIG", path);
    }

    let mut cfg = SessionConfig::load()?;
    if let Some(source) = args.source {
        cfg.source = source;
    }
    if let Some(model) = args.model {
        cfg.model = model;
    }
    if let Some(conf) = args.conf {
        cfg.confidence = conf;
    }
    if let Some(iou) = args.iou {
        cfg.iou = iou;
    }
    if let Some(delay) = args.delay_ms {
        cfg.delay_ms = delay;
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    cfg.save_annotated |= args.save_annotated;
    cfg.save_labels |= args.save_labels;
    cfg.save_confidence |= args.save_conf;

    let params = Arc::new(RunParameters::new());
    cfg.apply_to(&params);

    let (mut engine, control, events) = InferenceLoop::new(
        Arc::clone(&params),
        Box::new(DefaultLoader),
        cfg.output_dir.clone(),
    );

    let sigint_control = control.clone();
    ctrlc::set_handler(move || {
        log::info!("SIGINT received, stopping");
        sigint_control.stop();
    })?;

    let worker = thread::spawn(move || engine.run());

    // Drain events until the loop drops its sender.
    for event in events {
        match event {
            LoopEvent::Status(message) => log::info!("status: {message}"),
            LoopEvent::Fps(fps) => log::info!("fps: {fps}"),
            LoopEvent::Progress(value) => log::debug!("progress: {value}/1000"),
            LoopEvent::ClassCounts(counts) => {
                if counts.is_empty() {
                    log::debug!("no detections");
                } else {
                    let summary: Vec<String> = counts
                        .iter()
                        .map(|(name, count)| format!("{name} x{count}"))
                        .collect();
                    log::info!("detections: {}", summary.join(", "));
                }
            }
            LoopEvent::ClassTotal(total) => log::debug!("classes in frame: {total}"),
            LoopEvent::TargetTotal(total) => log::debug!("targets in frame: {total}"),
            LoopEvent::RawImage(image) => {
                log::trace!("raw frame {}x{}", image.width(), image.height())
            }
            LoopEvent::AnnotatedImage(image) => {
                log::trace!("annotated frame {}x{}", image.width(), image.height())
            }
        }
    }

    match worker.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            log::error!("session failed: {err:#}");
            std::process::exit(1);
        }
        Err(_) => {
            log::error!("worker thread panicked");
            std::process::exit(1);
        }
    }
}
