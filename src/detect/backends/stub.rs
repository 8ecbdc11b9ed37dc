use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::ingest::SampledFrame;
use crate::{BBox, RawDetection};

/// Scripted scene for the stub backend, in fractions of the frame size.
///
/// A person stands next to an item, then walks away to the right and leaves
/// the item behind.
#[derive(Clone, Debug)]
pub struct StubScene {
    pub item_label: String,
    pub item_confidence: f64,
    /// Item center, as a fraction of frame width / height.
    pub item_center: (f64, f64),
    /// Item side, as a fraction of the frame's shorter side.
    pub item_size: f64,
    /// Seconds the person stays next to the item.
    pub person_leaves_at_s: f64,
    /// Person walking speed in frame widths per second.
    pub person_speed: f64,
}

impl Default for StubScene {
    fn default() -> Self {
        Self {
            item_label: "suitcase".to_string(),
            item_confidence: 0.88,
            item_center: (0.55, 0.6),
            item_size: 0.2,
            person_leaves_at_s: 2.0,
            person_speed: 0.15,
        }
    }
}

/// Stub backend for tests and demos. Emits a deterministic scene derived
/// from the frame timestamp; the pixels are never inspected.
pub struct StubBackend {
    scene: StubScene,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_scene(StubScene::default())
    }

    pub fn with_scene(scene: StubScene) -> Self {
        Self { scene, calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::ObjectDetection | DetectionCapability::PersonDetection
        )
    }

    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        let dims = frame.dims();
        let (w, h) = (dims.width as f64, dims.height as f64);
        let scene = &self.scene;

        let side = scene.item_size * dims.min_side();
        let (cx, cy) = (scene.item_center.0 * w, scene.item_center.1 * h);
        let item = RawDetection::new(
            BBox::new(cx - side / 2.0, cy - side / 2.0, cx + side / 2.0, cy + side / 2.0),
            scene.item_confidence,
            scene.item_label.clone(),
        );

        let walked = (frame.timestamp_s - scene.person_leaves_at_s).max(0.0) * scene.person_speed * w;
        let person_w = 0.12 * w;
        let person_h = 0.5 * h;
        let px = cx + side + walked;
        let mut detections = vec![item];
        if px - person_w / 2.0 < w {
            detections.push(RawDetection::new(
                BBox::new(
                    px - person_w / 2.0,
                    cy - person_h / 2.0,
                    px + person_w / 2.0,
                    cy + person_h / 2.0,
                ),
                0.93,
                "person",
            ));
        }
        Ok(detections)
    }
}
