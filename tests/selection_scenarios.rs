use image::RgbImage;

use lostfound_engine::config::TrackingSettings;
use lostfound_engine::report::SelectionReport;
use lostfound_engine::{
    BBox, BestCandidateSelector, Candidate, CandidatePool, Category, ClassifiedDetection,
    ContextCropper, Engine, EngineConfig, FrameDims, ProximityFilter, RawDetection, SampledFrame,
    TrackManager, TrackState,
};

const FRAME: FrameDims = FrameDims {
    width: 640,
    height: 480,
};

fn raw(bbox: [f64; 4], confidence: f64, label: &str) -> RawDetection {
    RawDetection::new(BBox::new(bbox[0], bbox[1], bbox[2], bbox[3]), confidence, label)
}

fn frame(frame_number: u64, timestamp_s: f64) -> SampledFrame {
    SampledFrame {
        frame_number,
        timestamp_s,
        image: RgbImage::new(FRAME.width, FRAME.height),
    }
}

fn pooled(category: Category, confidence: f64, score: f64, track_id: u64) -> Candidate {
    Candidate {
        detection: ClassifiedDetection {
            detection: raw([100.0, 100.0, 160.0, 160.0], confidence, "item"),
            category,
            category_priority: 0.9,
        },
        track_id,
        frame_number: 0,
        timestamp_s: 0.0,
        attended: false,
        score,
        category_recurrence: 1,
    }
}

#[test]
fn scenario_a_priority_category_beats_higher_confidence() {
    let mut pool = CandidatePool::new();
    pool.push(pooled(Category::Bags, 0.8, 0.71, 1));
    pool.push(pooled(Category::Electronics, 0.95, 0.83, 2));

    let selector = BestCandidateSelector::new(vec![Category::Bags]);
    let result = selector.select(&pool);
    let winner = result.winner.expect("winner");
    assert_eq!(winner.category(), Category::Bags);
    assert_eq!(winner.confidence(), 0.8);
}

#[test]
fn scenario_a_through_the_engine() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut session = engine.session();
    session.observe(
        &frame(0, 0.0),
        vec![
            raw([100.0, 100.0, 180.0, 160.0], 0.8, "handbag"),
            raw([400.0, 200.0, 480.0, 260.0], 0.95, "laptop"),
        ],
    );
    let result = session.finish();
    assert_eq!(result.winner.map(|w| w.category()), Some(Category::Bags));
}

#[test]
fn scenario_b_stationary_then_moved() {
    let mut tracks = TrackManager::new(TrackingSettings {
        stationary_frames: 10,
        ..TrackingSettings::default()
    });
    let item = |x: f64| ClassifiedDetection {
        detection: raw([x, 200.0, x + 40.0, 240.0], 0.9, "backpack"),
        category: Category::Bags,
        category_priority: 0.9,
    };

    let mut track_id = 0;
    for idx in 0..=10u64 {
        let touched = tracks.update(&[item(300.0)], idx as f64 * 0.5);
        assert_eq!(touched.len(), 1);
        track_id = touched[0].track_id;
        assert_eq!(touched[0].stationary_frame_count, idx as u32);
    }
    assert!(tracks.stationary(track_id));
    assert_eq!(tracks.track(track_id).map(|t| t.state), Some(TrackState::Stationary));

    let moved = tracks.update(&[item(350.0)], 5.5);
    assert_eq!(moved[0].track_id, track_id);
    assert_eq!(moved[0].stationary_frame_count, 0);
    assert_eq!(moved[0].state, TrackState::Active);
    assert!(!tracks.stationary(track_id));
}

#[test]
fn scenario_c_person_nearby_attends_object() {
    let filter = ProximityFilter::default();
    let object = BBox::new(300.0, 300.0, 340.0, 340.0);
    assert!(!filter.is_attended(&object, &[], FRAME));

    let person = raw([310.0, 310.0, 330.0, 330.0], 0.9, "person");
    assert!(filter.is_attended(&object, &[person.clone()], FRAME));

    let unsure = RawDetection {
        confidence: 0.4,
        ..person
    };
    assert!(!filter.is_attended(&object, &[unsure], FRAME));
}

#[test]
fn scenario_d_nothing_found_for_whole_video() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut session = engine.session();
    for idx in 0..10u64 {
        session.observe(
            &frame(idx * 5, idx as f64 * 0.5),
            vec![
                raw([50.0, 50.0, 200.0, 150.0], 0.9, "car"),
                raw([300.0, 100.0, 360.0, 300.0], 0.95, "person"),
            ],
        );
    }
    let result = session.finish();
    assert!(!result.object_found());

    let report = SelectionReport::from_result(&result, None);
    let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(value["object_found"], serde_json::json!(false));
    assert!(value["category"].is_null());
    assert!(value["cropped_image"].is_null());
}

#[test]
fn excluded_labels_never_become_candidates() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut session = engine.session();
    for (idx, label) in ["car", "traffic light", "bench", "zebra", "potted plant"]
        .iter()
        .enumerate()
    {
        session.observe(
            &frame(idx as u64, idx as f64),
            vec![raw([200.0, 200.0, 260.0, 260.0], 0.95, label)],
        );
    }
    assert!(session.pool().is_empty());
}

#[test]
fn person_like_item_labels_do_not_attend_neighbours() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut session = engine.session();
    let outcome = session.observe(
        &frame(0, 0.0),
        vec![
            raw([300.0, 300.0, 340.0, 340.0], 0.9, "backpack"),
            raw([305.0, 305.0, 335.0, 335.0], 0.9, "personal item"),
        ],
    );
    assert_eq!(outcome.persons, 0);
    assert_eq!(outcome.attended, 0);
    assert_eq!(outcome.candidates, 1);
    assert_eq!(session.pool().len(), 1);
}

#[test]
fn winner_is_always_from_priority_partition_when_present() {
    let selector = BestCandidateSelector::new(vec![Category::Bags, Category::Personal]);
    let mut pool = CandidatePool::new();
    for (track_id, (category, score)) in [
        (Category::Electronics, 0.99),
        (Category::Clothing, 0.97),
        (Category::Personal, 0.41),
        (Category::Miscellaneous, 0.9),
        (Category::Bags, 0.4),
    ]
    .into_iter()
    .enumerate()
    {
        pool.push(pooled(category, 0.9, score, track_id as u64));
    }
    let winner = selector.best(&pool).expect("winner");
    assert_eq!(winner.category(), Category::Personal);
}

#[test]
fn crop_stays_inside_frame_for_odd_frame_sizes() {
    let cropper = ContextCropper::new(&EngineConfig::default().crop);
    for (width, height) in [(640, 480), (1920, 1080), (150, 900), (199, 201)] {
        let dims = FrameDims::new(width, height);
        let w = width as f64;
        let h = height as f64;
        for bbox in [
            BBox::new(0.0, 0.0, w * 0.05, h * 0.05),
            BBox::new(w * 0.4, h * 0.4, w * 0.6, h * 0.6),
            BBox::new(w * 0.9, h * 0.9, w, h),
        ] {
            let (rect, _) = cropper.crop_region_or_center(&bbox, dims);
            assert!(rect.contains_within(dims), "{rect:?} escapes {width}x{height}");
            assert!(rect.width >= 200.min(width));
            assert!(rect.height >= 200.min(height));
        }
    }
}
