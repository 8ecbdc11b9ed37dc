//! demo - end-to-end synthetic run of the lost-object engine
//!
//! A stub scene places a suitcase next to a person who walks away after a
//! couple of seconds. The run should pick the suitcase once it is left behind.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use lostfound_engine::detect::{StubBackend, StubScene};
use lostfound_engine::report::build_report;
use lostfound_engine::sink::{JsonFileSink, ReportSink};
use lostfound_engine::{Engine, EngineConfig, FileConfig, FileSource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic video.
    #[arg(long, default_value_t = 8)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for the report and crop.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Label the stub detector reports for the abandoned item.
    #[arg(long, default_value = "suitcase")]
    item: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let out_dir = PathBuf::from(&args.out);

    stage("configure engine");
    let config = EngineConfig::default();
    let jpeg_quality = config.crop.jpeg_quality;
    let engine = Engine::new(config)?;

    stage("scan synthetic frames");
    let mut source = FileSource::new(FileConfig {
        path: "stub://demo".to_string(),
        fps: args.fps as f64,
        frames: args.seconds.saturating_mul(args.fps as u64),
        ..FileConfig::default()
    })?;
    let mut detector = StubBackend::with_scene(StubScene {
        item_label: args.item.clone(),
        ..StubScene::default()
    });
    let stop = AtomicBool::new(false);
    let (result, stats) = engine.run_with_progress(&mut source, &mut detector, &stop, |_| {})?;
    eprintln!(
        "    {} frames read, {} evaluated, {} candidates pooled",
        stats.frames_read, stats.frames_processed, stats.candidates
    );

    stage("write report");
    let report = build_report(&result, &out_dir, jpeg_quality);
    JsonFileSink::in_dir(&out_dir).deliver(&report)?;
    println!("{}", report.to_json()?);

    match (&report.category, &report.timestamp) {
        (Some(category), Some(timestamp)) => {
            eprintln!("demo complete: {} left behind at {}", category, timestamp)
        }
        _ => eprintln!("demo complete: nothing left behind"),
    }
    Ok(())
}

fn stage(name: &str) {
    eprintln!("==> {}", name);
}
