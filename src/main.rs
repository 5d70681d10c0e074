//! PlateLens CLI
//!
//! Feeds still images, or directories of images treated as a frame
//! sequence, through the pipeline and prints one JSON report per analyzed
//! frame.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use platelens::config::{self, AppConfig, ConfigSource};
use platelens::vision::ModelType;
use platelens::{Frame, FrameAnalyzer, FrameReport, PipelineOrchestrator};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// PlateLens - detect objects and read the text inside them
#[derive(Parser, Debug)]
#[command(name = "platelens")]
#[command(about = "Object detection with per-object OCR over ONNX models")]
struct Args {
    /// Image files or directories of images
    inputs: Vec<PathBuf>,

    /// Config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Skip text recognition, report detections only
    #[arg(long)]
    no_ocr: bool,

    /// Write an annotated copy of every analyzed frame into this directory
    #[arg(long, value_name = "DIR")]
    overlay: Option<PathBuf>,

    /// Minimum time between analyzed frames
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Time between consecutive input frames (defaults to the interval, so
    /// every frame is analyzed)
    #[arg(long)]
    frame_spacing_ms: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Print model file status and exit
    #[arg(long)]
    model_status: bool,
}

/// One line of output
#[derive(Serialize)]
struct FrameOutput<'a> {
    input: String,
    #[serde(flatten)]
    report: &'a FrameReport,
}

fn main() {
    let args = Args::parse();

    let (config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.general.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!("{}", source);

    if let Err(e) = run(args, config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize logging, `RUST_LOG` overrides the configured level
fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Load the config file and apply command-line overrides
///
/// Runs before logging is set up, so the source is returned for `main` to log.
fn load_config(args: &Args) -> Result<(AppConfig, ConfigSource)> {
    let (mut config, source) = match &args.config {
        Some(path) => (
            config::load_config(path)?,
            ConfigSource::File(path.clone()),
        ),
        None => config::load_with_source(&config::default_config_path()?)?,
    };

    if let Some(dir) = &args.models_dir {
        config.models.dir = Some(dir.clone());
    }
    if args.no_ocr {
        config.pipeline.recognize_text = false;
    }
    if args.overlay.is_some() {
        config.overlay.enabled = true;
    }
    if let Some(interval) = args.interval_ms {
        config.pipeline.interval_ms = interval;
    }
    Ok((config, source))
}

fn run(args: Args, config: AppConfig) -> Result<()> {
    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if args.model_status {
        return print_model_status(&config);
    }

    let inputs = collect_inputs(&args.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("No input images given");
    }

    if let Some(dir) = &args.overlay {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create overlay directory {:?}", dir))?;
    }

    info!("PlateLens starting, {} input frames", inputs.len());
    let pipeline = PipelineOrchestrator::from_config(&config)?;

    let latest: Arc<Mutex<Option<FrameReport>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&latest);
    let mut analyzer = FrameAnalyzer::with_pipeline_interval(pipeline, move |report: &FrameReport| {
        *sink.lock() = Some(report.clone());
    });

    let spacing = Duration::from_millis(args.frame_spacing_ms.unwrap_or(config.pipeline.interval_ms));
    let start = Instant::now();

    for (index, path) in inputs.iter().enumerate() {
        let frame = match Frame::open(path) {
            Ok(frame) => Frame::at(frame.image, start + spacing * index as u32),
            Err(e) => {
                warn!("Skipping {:?}: {:#}", path, e);
                continue;
            }
        };

        if !analyzer.analyze(&frame) {
            info!("Frame {:?} dropped by throttle", path);
            continue;
        }

        let Some(report) = latest.lock().take() else {
            continue;
        };

        if let (Some(dir), Some(overlay)) = (&args.overlay, &report.overlay) {
            let out = overlay_path(dir, path);
            if let Err(e) = overlay.save(&out) {
                warn!("Failed to write overlay {:?}: {}", out, e);
            }
        }

        let output = FrameOutput {
            input: path.display().to_string(),
            report: &report,
        };
        let json = if config.general.pretty_json {
            serde_json::to_string_pretty(&output)?
        } else {
            serde_json::to_string(&output)?
        };
        println!("{}", json);
    }

    let stats = analyzer.stats();
    info!(
        "Done: {} frames analyzed, {} throttled, {} detections",
        stats.frames_analyzed, stats.frames_throttled, stats.detections_reported
    );
    Ok(())
}

fn print_model_status(config: &AppConfig) -> Result<()> {
    let manager = config.models.manager()?;
    println!("Models directory: {}", manager.models_dir().display());
    for status in manager.get_model_status() {
        let state = match (status.available, status.model_type.is_required()) {
            (true, _) => "ok",
            (false, true) => "MISSING",
            (false, false) => "missing (optional)",
        };
        println!(
            "  {:<22} {:<20} {}",
            status.model_type.display_name(),
            status
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            state
        );
    }
    if !manager.are_models_ready(config.pipeline.recognize_text) {
        println!(
            "Place the missing files in the models directory ({} is required).",
            ModelType::ObjectDetector.filename()
        );
    }
    Ok(())
}

/// Expand directories into their image files, sorted by name
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image(path))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn overlay_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    dir.join(format!("{}_overlay.png", stem))
}
