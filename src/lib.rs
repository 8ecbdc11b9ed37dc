//! Lost-Object Candidate Selection Engine
//!
//! This crate decides which detections coming out of an external visual detector
//! represent a genuinely lost or unattended item, and picks one representative
//! detection (plus a context crop) for a whole video or image batch.
//!
//! # Pipeline
//!
//! raw detections → `classify` → `proximity` → `track` → `score` → `select` → `crop`
//!
//! Every stage is driven by a single [`config::EngineConfig`] handed to
//! [`engine::Engine::new`]. Track state never outlives a [`engine::Session`].
//!
//! # Module Structure
//!
//! - `classify`: label normalization and category gates
//! - `proximity`: attended / unattended decision
//! - `track`: per-session multi-object tracking and stationarity
//! - `score`: composite candidate score
//! - `select`: candidate pool and best-candidate selection
//! - `crop`: context-aware crop region and extraction
//! - `detect`: detector collaborator seam (backends, fusion, timeouts)
//! - `ingest`: frame sources and sampling
//! - `report` / `sink`: the output record and its best-effort delivery

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod classify;
pub mod config;
pub mod crop;
pub mod detect;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod proximity;
pub mod report;
pub mod score;
pub mod select;
pub mod sink;
pub mod track;
pub mod ui;

pub use classify::CategoryClassifier;
pub use config::EngineConfig;
pub use crop::{ContextCropper, CropRect};
pub use detect::{BackendRegistry, DetectionCapability, DetectorBackend};
pub use engine::{Engine, Session, SessionStats};
pub use error::{EngineError, ErrorKind};
pub use ingest::{FileConfig, FileSource, FrameSampler, FrameSource, SampledFrame};
pub use proximity::ProximityFilter;
pub use report::SelectionReport;
pub use score::CandidateScorer;
pub use select::{BestCandidateSelector, Candidate, CandidatePool, SelectionResult};
pub use track::{Track, TrackManager, TrackState};

// -------------------- Categories --------------------

/// Semantic category assigned to a detection.
///
/// `Person` is reserved for attendance checks and `Excluded` marks detections
/// that must never become lost-item candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Bags,
    Electronics,
    Personal,
    Clothing,
    Miscellaneous,
    Person,
    Excluded,
}

impl Category {
    /// Categories eligible to become lost-item candidates.
    pub const LOST_ITEMS: [Category; 5] = [
        Category::Bags,
        Category::Electronics,
        Category::Personal,
        Category::Clothing,
        Category::Miscellaneous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bags => "BAGS",
            Category::Electronics => "ELECTRONICS",
            Category::Personal => "PERSONAL",
            Category::Clothing => "CLOTHING",
            Category::Miscellaneous => "MISCELLANEOUS",
            Category::Person => "PERSON",
            Category::Excluded => "EXCLUDED",
        }
    }

    /// Case-insensitive parse; accepts `MISC` as a short form.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BAGS" | "BAG" => Some(Category::Bags),
            "ELECTRONICS" => Some(Category::Electronics),
            "PERSONAL" => Some(Category::Personal),
            "CLOTHING" => Some(Category::Clothing),
            "MISCELLANEOUS" | "MISC" => Some(Category::Miscellaneous),
            "PERSON" => Some(Category::Person),
            "EXCLUDED" => Some(Category::Excluded),
            _ => None,
        }
    }

    pub fn is_lost_item(&self) -> bool {
        Self::LOST_ITEMS.contains(self)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Geometry --------------------

/// Axis-aligned box in source-frame pixel coordinates (x1, y1, x2, y2).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    /// Build a box, swapping corners so that `x1 <= x2` and `y1 <= y2`.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Intersection over union; zero when either box is empty.
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// `[x, y, width, height]`, the shape used by the output record.
    pub fn to_xywh(&self) -> [f64; 4] {
        [self.x1, self.y1, self.width(), self.height()]
    }
}

pub fn centroid_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
}

impl FrameDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn min_side(&self) -> f64 {
        self.width.min(self.height) as f64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// -------------------- Detections --------------------

/// Canonical detector output. Every payload shape is normalized into this at
/// the ingestion boundary (see `detect::payload`).
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub confidence: f64,
    pub raw_label: String,
}

impl RawDetection {
    pub fn new(bbox: BBox, confidence: f64, raw_label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            raw_label: raw_label.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: RawDetection,
    pub category: Category,
    pub category_priority: f64,
}

impl ClassifiedDetection {
    pub fn bbox(&self) -> &BBox {
        &self.detection.bbox
    }

    pub fn confidence(&self) -> f64 {
        self.detection.confidence
    }
}
