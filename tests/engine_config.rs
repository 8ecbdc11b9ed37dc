use std::sync::Mutex;

use tempfile::NamedTempFile;

use lostfound_engine::config::{EngineConfig, UnknownLabelPolicy};
use lostfound_engine::Category;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LOSTFOUND_CONFIG",
        "LOSTFOUND_CONFIDENCE_THRESHOLD",
        "LOSTFOUND_STATIONARY_FRAMES",
        "LOSTFOUND_STATIONARY_THRESHOLD_PX",
        "LOSTFOUND_MIN_DETECTION_INTERVAL_S",
        "LOSTFOUND_MAX_TRACKING_DISTANCE_PX",
        "LOSTFOUND_MIN_CROP_SIZE",
        "LOSTFOUND_PRIORITY_CATEGORIES",
        "LOSTFOUND_UNKNOWN_LABEL_POLICY",
        "LOSTFOUND_REQUIRE_STATIONARY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "confidence_threshold": 0.35,
        "categories": {
            "ELECTRONICS": { "priority": 0.8, "min_confidence": 0.55 }
        },
        "labels": { "Duffel Bag": "BAGS", "tablet": "ELECTRONICS" },
        "tracking": {
            "stationary_frames": 12,
            "max_tracking_distance_px": 80
        },
        "selection": {
            "priority_categories": ["BAGS", "ELECTRONICS"],
            "early_stop_after": 4
        },
        "crop": {
            "min_crop_size": 256,
            "padding_tiers": [
                { "max_area_ratio": 0.1, "factor": 2.0 },
                { "max_area_ratio": 0.02, "factor": 3.0 }
            ]
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LOSTFOUND_CONFIG", file.path());
    std::env::set_var("LOSTFOUND_STATIONARY_FRAMES", "20");
    std::env::set_var("LOSTFOUND_UNKNOWN_LABEL_POLICY", "MISCELLANEOUS");

    let cfg = EngineConfig::load().expect("load config");

    assert_eq!(cfg.classifier.confidence_threshold, 0.35);
    let electronics = &cfg.classifier.profiles[&Category::Electronics];
    assert_eq!(electronics.priority, 0.8);
    assert_eq!(electronics.min_confidence, 0.55);
    assert_eq!(cfg.classifier.labels["duffel bag"], Category::Bags);
    assert_eq!(cfg.classifier.labels["tablet"], Category::Electronics);
    assert_eq!(
        cfg.classifier.unknown_label_policy,
        UnknownLabelPolicy::Include(Category::Miscellaneous)
    );
    assert_eq!(cfg.tracking.stationary_frames, 20);
    assert_eq!(cfg.tracking.max_tracking_distance_px, 80.0);
    assert_eq!(
        cfg.selection.priority_categories,
        vec![Category::Bags, Category::Electronics]
    );
    assert_eq!(cfg.selection.early_stop_after, Some(4));
    assert_eq!(cfg.crop.min_crop_size, 256);
    assert_eq!(cfg.crop.tiers[0].max_area_ratio, 0.02);
    assert_eq!(cfg.crop.tiers[1].max_area_ratio, 0.1);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
confidence_threshold = 0.4
unknown_label_policy = "exclude"

[tracking]
stationary_threshold_px = 25.0
require_stationary = true

[scoring.weights]
confidence = 0.5
priority = 0.2
size = 0.2
position = 0.1
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = EngineConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.classifier.confidence_threshold, 0.4);
    assert_eq!(cfg.classifier.unknown_label_policy, UnknownLabelPolicy::Exclude);
    assert_eq!(cfg.tracking.stationary_threshold_px, 25.0);
    assert!(cfg.tracking.require_stationary);
    assert_eq!(cfg.scoring.weights.confidence, 0.5);

    clear_env();
}

#[test]
fn env_overrides_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOSTFOUND_CONFIDENCE_THRESHOLD", "0.45");
    std::env::set_var("LOSTFOUND_MIN_CROP_SIZE", "320");
    std::env::set_var("LOSTFOUND_PRIORITY_CATEGORIES", "electronics, personal");
    std::env::set_var("LOSTFOUND_REQUIRE_STATIONARY", "true");

    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg.classifier.confidence_threshold, 0.45);
    assert_eq!(cfg.crop.min_crop_size, 320);
    assert_eq!(
        cfg.selection.priority_categories,
        vec![Category::Electronics, Category::Personal]
    );
    assert!(cfg.tracking.require_stationary);

    clear_env();
}

#[test]
fn rejects_weights_that_do_not_sum_to_one() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "scoring": { "weights": { "confidence": 0.6 } } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = EngineConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("weights"), "{err}");

    clear_env();
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOSTFOUND_STATIONARY_FRAMES", "many");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("LOSTFOUND_PRIORITY_CATEGORIES", "BAGS,SUNGLASSES_CASE");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("LOSTFOUND_UNKNOWN_LABEL_POLICY", "PERSON");
    assert!(EngineConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    std::env::set_var("LOSTFOUND_CONFIG", dir.path().join("absent.json"));
    assert!(EngineConfig::load().is_err());

    clear_env();
}
