//! lostfound - pick the most likely lost object in a frame sequence.
//!
//! This tool:
//! 1. Reads frames from a directory, a single image, or a `stub://` source
//! 2. Runs a detector (recorded detections replayed per frame, or the stub scene)
//! 3. Selects the best unattended candidate and crops it with context
//! 4. Writes `report.json` and the crop into the output directory
//!
//! Exits 0 whether or not an object was found.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lostfound_engine::detect::{ReplayBackend, StubBackend, TimedDetector};
use lostfound_engine::report::build_report;
use lostfound_engine::sink::{deliver_best_effort, JsonFileSink, ReportSink, RetryPolicy};
use lostfound_engine::ui::Ui;
use lostfound_engine::{
    BackendRegistry, DetectionCapability, DetectorBackend, Engine, EngineConfig, FileConfig,
    FileSource,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Select the most likely lost object in a frame sequence"
)]
struct Args {
    /// Frame directory, single image file, or stub://<name>.
    #[arg(long, env = "LOSTFOUND_SOURCE")]
    source: String,

    /// Recorded detector output (JSON) replayed against the frames.
    #[arg(long, env = "LOSTFOUND_DETECTIONS")]
    detections: Option<PathBuf>,

    /// Nominal frame rate of the source.
    #[arg(long, env = "LOSTFOUND_FPS", default_value_t = 10.0)]
    fps: f64,

    /// Evaluate every image instead of sampling by frame rate (photo batches).
    #[arg(long, env = "LOSTFOUND_BATCH")]
    batch: bool,

    /// Output directory for report.json and the crop.
    #[arg(long, env = "LOSTFOUND_OUT", default_value = "lostfound_out")]
    out: PathBuf,

    /// Engine config file (TOML or JSON). Falls back to LOSTFOUND_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    /// Stop once this many confident priority candidates are pooled.
    #[arg(long)]
    early_stop: Option<usize>,

    /// POST the report to this URL (built with the sink-http feature).
    #[arg(long, env = "LOSTFOUND_POST_URL")]
    post_url: Option<String>,

    /// Per-frame detector deadline in milliseconds.
    #[arg(long, env = "LOSTFOUND_DETECTOR_TIMEOUT_MS", default_value_t = 5000)]
    detector_timeout_ms: u64,

    /// Synthetic frame count (stub:// sources only).
    #[arg(long, default_value_t = 100)]
    frames: u64,

    /// Synthetic frame width (stub:// sources only).
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Synthetic frame height (stub:// sources only).
    #[arg(long, default_value_t = 480)]
    height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(Some(path))?,
        None => EngineConfig::load()?,
    };
    if args.early_stop.is_some() {
        config.selection.early_stop_after = args.early_stop;
    }
    let jpeg_quality = config.crop.jpeg_quality;
    let engine = Engine::new(config)?;

    let mut detector = {
        let _stage = ui.stage("Prepare detector");
        let registry = build_registry(&args)?;
        log::info!("detector backends: {}", registry.list().join(", "));
        let backend = registry.shared_for_capability(DetectionCapability::ObjectDetection)?;
        if !backend.supports(DetectionCapability::PersonDetection) {
            log::warn!(
                "backend {} does not report persons; every item will be treated as unattended",
                backend.name()
            );
        }
        TimedDetector::new(backend, Duration::from_millis(args.detector_timeout_ms))?
    };

    let mut source = FileSource::new(FileConfig {
        path: args.source.clone(),
        fps: args.fps,
        width: args.width,
        height: args.height,
        frames: args.frames,
        batch: args.batch,
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(err) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            log::warn!("could not install Ctrl-C handler: {}", err);
        }
    }

    let (result, stats) = {
        let mut stage = ui.stage("Scan frames");
        let (result, stats) =
            engine.run_with_progress(&mut source, &mut detector, &stop, |stats| stage.progress(stats))?;
        stage.set_summary(lostfound_engine::ui::progress_line(&stats));
        (result, stats)
    };
    if detector.timeouts() > 0 {
        log::warn!(
            "{} frame(s) hit the detector deadline and were treated as empty",
            detector.timeouts()
        );
    }
    if stats.cancelled {
        log::info!("interrupted; reporting on the frames seen so far");
    }

    let report = {
        let _stage = ui.stage("Write report");
        let report = build_report(&result, &args.out, jpeg_quality);
        let mut sinks = build_sinks(&args);
        let delivered = deliver_best_effort(&mut sinks, &report, RetryPolicy::default());
        if delivered < sinks.len() {
            log::warn!("report delivered to {}/{} sinks", delivered, sinks.len());
        }
        report
    };

    println!("{}", report.to_json()?);
    Ok(())
}

fn build_registry(args: &Args) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    if let Some(path) = &args.detections {
        let replay = ReplayBackend::from_path(path)?;
        log::info!(
            "replaying detections for {} frames from {}",
            replay.recorded_frames(),
            path.display()
        );
        registry.register(replay);
    }
    if args.source.starts_with("stub://") {
        registry.register(StubBackend::new());
    }
    Ok(registry)
}

fn build_sinks(args: &Args) -> Vec<Box<dyn ReportSink>> {
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(JsonFileSink::in_dir(&args.out))];
    if let Some(url) = &args.post_url {
        add_http_sink(&mut sinks, url);
    }
    sinks
}

#[cfg(feature = "sink-http")]
fn add_http_sink(sinks: &mut Vec<Box<dyn ReportSink>>, url: &str) {
    match lostfound_engine::sink::HttpSink::new(url, Duration::from_secs(10)) {
        Ok(sink) => sinks.push(Box::new(sink)),
        Err(err) => log::warn!("report will not be posted: {:#}", err),
    }
}

#[cfg(not(feature = "sink-http"))]
fn add_http_sink(_sinks: &mut Vec<Box<dyn ReportSink>>, url: &str) {
    log::warn!(
        "built without the sink-http feature; not posting report to {}",
        url
    );
}
