use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::payload::{records_into_detections, DetectionRecord};
use crate::ingest::SampledFrame;
use crate::RawDetection;

#[derive(Deserialize)]
struct ReplayFrame {
    frame_number: u64,
    detections: Vec<DetectionRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
    Map(BTreeMap<String, Vec<DetectionRecord>>),
    List(Vec<ReplayFrame>),
}

/// Replays detections recorded from an external detector, keyed by frame number.
///
/// Frames with no recording yield no detections.
pub struct ReplayBackend {
    frames: BTreeMap<u64, Vec<RawDetection>>,
}

impl ReplayBackend {
    pub fn empty() -> Self {
        Self {
            frames: BTreeMap::new(),
        }
    }

    pub fn from_frames(frames: BTreeMap<u64, Vec<RawDetection>>) -> Self {
        Self { frames }
    }

    /// Accepts `{"<frame>": [detections...]}` or `[{"frame_number": n, "detections": [...]}]`.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ReplayFile =
            serde_json::from_str(json).map_err(|e| anyhow!("invalid replay file: {}", e))?;
        let mut frames = BTreeMap::new();
        match file {
            ReplayFile::Map(map) => {
                for (key, records) in map {
                    let frame_number: u64 = key
                        .trim()
                        .parse()
                        .map_err(|_| anyhow!("replay key {:?} is not a frame number", key))?;
                    frames
                        .entry(frame_number)
                        .or_insert_with(Vec::new)
                        .extend(records_into_detections(records)?);
                }
            }
            ReplayFile::List(list) => {
                for frame in list {
                    frames
                        .entry(frame.frame_number)
                        .or_insert_with(Vec::new)
                        .extend(records_into_detections(frame.detections)?);
                }
            }
        }
        Ok(Self { frames })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("loading {}", path.display()))
    }

    pub fn recorded_frames(&self) -> usize {
        self.frames.len()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::ObjectDetection | DetectionCapability::PersonDetection
        )
    }

    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>> {
        Ok(self
            .frames
            .get(&frame.frame_number)
            .cloned()
            .unwrap_or_default())
    }
}
