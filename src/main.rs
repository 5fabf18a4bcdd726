use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use plantwatch::classifier::build_classifier;
use plantwatch::output::{FrameSink, NullSink, PreviewFileSink};
use plantwatch::source::{FrameSource, ImageDirSource};
use plantwatch::{DetectionPipeline, PlantWatchConfig};

#[derive(Parser)]
#[command(name = "plantwatch")]
#[command(about = "Live leaf detection, classification and colour-health monitoring")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "plantwatch.toml")]
    config: String,

    /// Camera device index
    #[arg(short = 'd', long)]
    camera_device: Option<u32>,

    /// Replay images from a directory instead of reading a camera
    #[arg(short, long)]
    image_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("plantwatch={}", log_level))
        .try_init();

    info!("Starting PlantWatch");

    let mut config = PlantWatchConfig::load(&args.config).await?;
    if let Some(index) = args.camera_device {
        config.source.camera_index = index;
    }
    if let Some(dir) = args.image_dir {
        config.source.image_dir = Some(dir);
    }
    info!("Configuration loaded successfully");

    let source = open_source(&config)?;
    let classifier = build_classifier(&config.classifier)?;
    let sink: Box<dyn FrameSink> = match &config.output.preview_path {
        Some(path) => {
            info!("Writing annotated preview to {}", path.display());
            Box::new(PreviewFileSink::new(path)?)
        }
        None => Box::new(NullSink),
    };

    let ignored_labels = config.classifier.ignored_labels.clone();
    let snapshot_path = config.output.snapshot_path.clone();

    let pipeline = DetectionPipeline::new(config, source, classifier, sink)?;
    let handle = pipeline.start();
    let state = handle.state();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            handle.stop();
        }
        _ = wait_finished(&handle) => {}
    }

    let result = handle.join().await;

    match state.report(&ignored_labels) {
        Some(snapshot) => info!(
            "Last detection: {} ({:.2}), {:?}: {}",
            snapshot.classification.label,
            snapshot.classification.probability,
            snapshot.health.status,
            snapshot.health.reason
        ),
        None => info!("No plant in the last detection"),
    }
    if let Some(path) = snapshot_path {
        match state.snapshot().save(&path).await {
            Ok(()) => info!("Detection snapshot written to {}", path.display()),
            Err(e) => warn!("Could not write detection snapshot: {}", e),
        }
    }

    match result {
        Ok(summary) => {
            info!("Processed {} frames with {} candidates", summary.frames, summary.candidates);
            Ok(())
        }
        Err(e) => {
            error!("Pipeline error: {:#}", e);
            Err(e)
        }
    }
}

async fn wait_finished(handle: &plantwatch::PipelineHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

fn open_source(config: &PlantWatchConfig) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &config.source.image_dir {
        return Ok(Box::new(ImageDirSource::new(dir)));
    }
    camera_source(config.source.camera_index)
}

#[cfg(feature = "camera")]
fn camera_source(index: u32) -> Result<Box<dyn FrameSource>> {
    use plantwatch::camera::CameraSource;

    let available = CameraSource::detect_cameras();
    if !available.contains(&index) {
        warn!("Camera {} not detected (available: {:?})", index, available);
    }
    Ok(Box::new(CameraSource::new(index)))
}

#[cfg(not(feature = "camera"))]
fn camera_source(index: u32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "camera {} requested but this build has no camera support; rebuild with --features camera or pass --image-dir",
        index
    )
}
