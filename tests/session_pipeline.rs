use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use image::{Rgb, RgbImage};

use lostfound_engine::detect::{ReplayBackend, StubBackend, TimedDetector};
use lostfound_engine::error::{error_kind, ErrorKind};
use lostfound_engine::report::{build_report, SelectionReport};
use lostfound_engine::sink::{deliver_best_effort, JsonFileSink, ReportSink, RetryPolicy};
use lostfound_engine::{Category, Engine, EngineConfig, FileConfig, FileSource};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default engine")
}

#[test]
fn stub_scene_picks_item_after_owner_walks_away() {
    let engine = engine();
    let mut source = FileSource::new(FileConfig {
        path: "stub://lobby".to_string(),
        fps: 10.0,
        frames: 80,
        ..FileConfig::default()
    })
    .unwrap();
    let mut detector = StubBackend::new();
    let stop = AtomicBool::new(false);

    let (result, stats) = engine
        .run_with_progress(&mut source, &mut detector, &stop, |_| {})
        .unwrap();

    // 10 fps samples every 5th frame.
    assert_eq!(stats.frames_read, 80);
    assert_eq!(stats.frames_sampled, 16);
    assert_eq!(detector.calls(), 16);

    let winner = result.winner.as_ref().expect("suitcase should be selected");
    assert_eq!(winner.category(), Category::Bags);
    assert!(!winner.attended);
    assert!(
        winner.timestamp_s > 3.0,
        "owner was still next to the item at {}",
        winner.timestamp_s
    );
    assert_eq!(winner.frame_number % 5, 0);

    let rect = result.crop_region.expect("crop region");
    assert!(rect.right() <= 640 && rect.bottom() <= 480);
    assert!(rect.width >= 200 && rect.height >= 200);
    assert!(result.crop_image.is_some());
}

fn write_frames(dir: &Path, count: usize) {
    for idx in 0..count {
        let image = RgbImage::from_pixel(640, 480, Rgb([40, 40 + idx as u8 * 10, 90]));
        image
            .save(dir.join(format!("frame_{idx:04}.png")))
            .expect("write frame");
    }
}

fn write_replay(path: &Path) {
    // Frames 0-2: a person stands over the backpack. Frames 3-5: it is alone.
    // A parked car shows up throughout and must be ignored.
    let mut frames = serde_json::Map::new();
    for idx in 0..6 {
        let mut detections = vec![
            serde_json::json!({ "box": [250, 220, 310, 290], "score": 0.86, "class": "backpack" }),
            serde_json::json!({ "bbox": [20, 300, 220, 420], "confidence": 0.97, "label": "car" }),
        ];
        if idx < 3 {
            detections.push(
                serde_json::json!({ "xyxy": [300, 120, 370, 400], "conf": 0.91, "class_name": "person" }),
            );
        }
        frames.insert(idx.to_string(), serde_json::Value::Array(detections));
    }
    std::fs::write(path, serde_json::to_string_pretty(&frames).unwrap()).expect("write replay");
}

#[test]
fn directory_frames_with_replayed_detections_produce_report() {
    let workspace = tempfile::tempdir().unwrap();
    let frames_dir = workspace.path().join("frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    write_frames(&frames_dir, 6);
    let replay_path = workspace.path().join("detections.json");
    write_replay(&replay_path);
    let out_dir = workspace.path().join("out");

    let engine = engine();
    let mut source = FileSource::new(FileConfig {
        path: frames_dir.display().to_string(),
        fps: 2.0,
        ..FileConfig::default()
    })
    .unwrap();
    let replay = ReplayBackend::from_path(&replay_path).unwrap();
    let mut detector = TimedDetector::new(replay, Duration::from_secs(5)).unwrap();
    let stop = AtomicBool::new(false);

    let (result, stats) = engine
        .run_with_progress(&mut source, &mut detector, &stop, |_| {})
        .unwrap();
    assert_eq!(stats.frames_processed, 6);
    assert_eq!(detector.timeouts(), 0);

    let winner = result.winner.as_ref().expect("backpack should be selected");
    assert_eq!(winner.category(), Category::Bags);
    assert!(winner.frame_number >= 3, "attended frames must not win");

    let report = build_report(&result, &out_dir, 90);
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(JsonFileSink::in_dir(&out_dir))];
    assert_eq!(deliver_best_effort(&mut sinks, &report, RetryPolicy::none()), 1);

    let written: SelectionReport =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("report.json")).unwrap())
            .unwrap();
    assert!(written.object_found);
    assert_eq!(written.category.as_deref(), Some("BAGS"));
    assert_eq!(written.bbox, Some([250.0, 220.0, 60.0, 70.0]));
    assert_eq!(written.timestamp.as_deref(), Some("00:01"));
    assert_eq!(written.category_stats["BAGS"].count, 3);

    let crop_path = PathBuf::from(written.cropped_image.expect("crop path"));
    let crop = image::open(&crop_path).expect("crop is a readable jpeg");
    assert!(crop.width() >= 200 && crop.height() >= 200);
}

#[test]
fn missing_frames_directory_is_input_error() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = engine();
    let mut source = FileSource::new(FileConfig {
        path: workspace.path().join("nope").display().to_string(),
        ..FileConfig::default()
    })
    .unwrap();
    let stop = AtomicBool::new(false);
    let err = engine
        .run(&mut source, &mut StubBackend::new(), &stop)
        .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Input));
}

#[test]
fn frames_without_detections_report_not_found() {
    let workspace = tempfile::tempdir().unwrap();
    write_frames(workspace.path(), 4);
    let engine = engine();
    let mut source = FileSource::new(FileConfig {
        path: workspace.path().display().to_string(),
        fps: 1.0,
        ..FileConfig::default()
    })
    .unwrap();
    let stop = AtomicBool::new(false);
    let result = engine
        .run(&mut source, &mut ReplayBackend::empty(), &stop)
        .unwrap();
    assert!(!result.object_found());

    let out_dir = workspace.path().join("out");
    let report = build_report(&result, &out_dir, 90);
    assert_eq!(report, SelectionReport::not_found());
    assert!(!out_dir.exists(), "no crop means nothing is written");
}

#[test]
fn image_batch_evaluates_every_image() {
    let workspace = tempfile::tempdir().unwrap();
    write_frames(workspace.path(), 7);
    let engine = engine();
    let stop = AtomicBool::new(false);

    let mut sampled = FileSource::new(FileConfig {
        path: workspace.path().display().to_string(),
        fps: 10.0,
        ..FileConfig::default()
    })
    .unwrap();
    let (_, stats) = engine
        .run_with_progress(&mut sampled, &mut ReplayBackend::empty(), &stop, |_| {})
        .unwrap();
    assert_eq!(stats.frames_read, 7);
    assert_eq!(stats.frames_sampled, 2);

    let mut batch = FileSource::new(FileConfig {
        path: workspace.path().display().to_string(),
        fps: 10.0,
        batch: true,
        ..FileConfig::default()
    })
    .unwrap();
    let (_, stats) = engine
        .run_with_progress(&mut batch, &mut ReplayBackend::empty(), &stop, |_| {})
        .unwrap();
    assert_eq!(stats.frames_sampled, 7);
    assert_eq!(stats.frames_processed, 7);
}
