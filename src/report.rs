//! Report for one processed video or image batch.
//!
//! Null fields are serialized explicitly so consumers can rely on the keys
//! being present when nothing was found.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::select::{Candidate, CategoryStats, SelectionResult};

pub const REPORT_FILE_NAME: &str = "report.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub object_found: bool,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    /// `[x, y, width, height]` in pixels.
    pub bbox: Option<[f64; 4]>,
    pub frame_number: Option<u64>,
    /// `MM:SS` position in the source.
    pub timestamp: Option<String>,
    pub score: Option<f64>,
    pub cropped_image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_stats: BTreeMap<String, CategoryStats>,
}

impl SelectionReport {
    pub fn not_found() -> Self {
        Self {
            object_found: false,
            category: None,
            confidence: None,
            bbox: None,
            frame_number: None,
            timestamp: None,
            score: None,
            cropped_image: None,
            category_stats: BTreeMap::new(),
        }
    }

    pub fn from_result(result: &SelectionResult, cropped_image: Option<&Path>) -> Self {
        let Some(winner) = result.winner.as_ref() else {
            return Self::not_found();
        };
        Self {
            object_found: true,
            category: Some(winner.category().as_str().to_string()),
            confidence: Some(winner.confidence()),
            bbox: Some(winner.bbox().to_xywh()),
            frame_number: Some(winner.frame_number),
            timestamp: Some(format_timestamp(winner.timestamp_s)),
            score: Some(winner.score),
            cropped_image: cropped_image.map(|path| path.display().to_string()),
            category_stats: result
                .category_stats
                .iter()
                .map(|(category, stats)| (category.as_str().to_string(), *stats))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `MM:SS` for a position in seconds. Minutes are not wrapped at an hour.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

pub fn crop_file_name(winner: &Candidate) -> String {
    format!(
        "crop_{}_f{:06}_t{}.jpg",
        winner.category().as_str().to_ascii_lowercase(),
        winner.frame_number,
        winner.track_id
    )
}

pub fn save_crop(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    encoder
        .encode_image(image)
        .with_context(|| format!("encode crop {}", path.display()))?;
    Ok(())
}

/// Write the crop (if any) into `out_dir` and build the report.
///
/// Persistence failures are logged and leave `cropped_image` null; they never
/// discard the selection.
pub fn build_report(result: &SelectionResult, out_dir: &Path, jpeg_quality: u8) -> SelectionReport {
    let crop_path = match (result.winner.as_ref(), result.crop_image.as_ref()) {
        (Some(winner), Some(image)) => {
            let path = out_dir.join(crop_file_name(winner));
            match persist_crop(image, out_dir, &path, jpeg_quality) {
                Ok(()) => Some(path),
                Err(err) => {
                    log::warn!("could not save crop: {:#}", err);
                    None
                }
            }
        }
        _ => None,
    };
    SelectionReport::from_result(result, crop_path.as_deref())
}

fn persist_crop(image: &RgbImage, out_dir: &Path, path: &Path, quality: u8) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;
    save_crop(image, path, quality)?;
    log::info!("crop saved to {}", path.display());
    Ok(())
}
