//! Canonical ingestion of detector payloads.
//!
//! Detectors disagree on field names (`score` vs `confidence`, `class` vs
//! `class_name` vs `label`). Everything is normalized here into
//! [`RawDetection`]; nothing downstream sees the raw shapes.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::{BBox, RawDetection};

/// One detection as a detector emitted it. Each concept may arrive under
/// several keys; when more than one is present the first in
/// [`DetectionRecord::into_detection`]'s preference order wins.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetectionRecord {
    pub bbox: Option<[f64; 4]>,
    #[serde(rename = "box")]
    pub box_: Option<[f64; 4]>,
    pub xyxy: Option<[f64; 4]>,
    pub confidence: Option<f64>,
    pub conf: Option<f64>,
    /// Some producers store a composite ranking here next to `confidence`.
    pub score: Option<f64>,
    pub raw_label: Option<String>,
    pub class_name: Option<String>,
    pub label: Option<String>,
    pub class: Option<String>,
    pub name: Option<String>,
}

impl DetectionRecord {
    /// Prefers `confidence` over `conf` over `score`, and `bbox` over `box`
    /// over `xyxy`.
    pub fn into_detection(self) -> Result<RawDetection> {
        let raw_label = self
            .raw_label
            .or(self.class_name)
            .or(self.label)
            .or(self.class)
            .or(self.name)
            .ok_or_else(|| anyhow!("detection has no class label"))?;
        let [x1, y1, x2, y2] = self
            .bbox
            .or(self.box_)
            .or(self.xyxy)
            .ok_or_else(|| anyhow!("detection {:?} has no bbox", raw_label))?;
        let confidence = self
            .confidence
            .or(self.conf)
            .or(self.score)
            .ok_or_else(|| anyhow!("detection {:?} has no confidence", raw_label))?;

        let bbox = BBox::new(x1, y1, x2, y2);
        if !bbox.is_finite() {
            return Err(anyhow!("detection {:?} has a non-finite bbox", raw_label));
        }
        if !confidence.is_finite() {
            return Err(anyhow!(
                "detection {:?} has a non-finite confidence",
                raw_label
            ));
        }
        Ok(RawDetection {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            raw_label,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionPayload {
    List(Vec<DetectionRecord>),
    Wrapped { detections: Vec<DetectionRecord> },
}

pub fn records_into_detections(records: Vec<DetectionRecord>) -> Result<Vec<RawDetection>> {
    records
        .into_iter()
        .map(DetectionRecord::into_detection)
        .collect()
}

/// Parse either a bare JSON list of detections or `{"detections": [...]}`.
pub fn parse_detections(json: &str) -> Result<Vec<RawDetection>> {
    let payload: DetectionPayload =
        serde_json::from_str(json).map_err(|e| anyhow!("invalid detection payload: {}", e))?;
    let records = match payload {
        DetectionPayload::List(records) => records,
        DetectionPayload::Wrapped { detections } => detections,
    };
    records_into_detections(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_field_aliases() {
        let detections = parse_detections(
            r#"[
                {"bbox": [10, 20, 110, 220], "confidence": 0.9, "raw_label": "suitcase"},
                {"box": [5, 5, 15, 15], "score": 0.4, "class": "cup"},
                {"xyxy": [0, 0, 1, 1], "conf": 0.7, "class_name": "person"},
                {"bbox": [0, 0, 1, 1], "score": 0.6, "label": "backpack"}
            ]"#,
        )
        .unwrap();
        assert_eq!(detections.len(), 4);
        assert_eq!(detections[0].raw_label, "suitcase");
        assert_eq!(detections[1].confidence, 0.4);
        assert_eq!(detections[1].raw_label, "cup");
        assert_eq!(detections[2].raw_label, "person");
        assert_eq!(detections[3].raw_label, "backpack");
    }

    #[test]
    fn accepts_wrapped_payload_and_fixes_corner_order() {
        let detections = parse_detections(
            r#"{"detections": [{"bbox": [110, 220, 10, 20], "score": 1.4, "class": "bag"}]}"#,
        )
        .unwrap();
        assert_eq!(detections[0].bbox, BBox::new(10.0, 20.0, 110.0, 220.0));
        assert_eq!(detections[0].confidence, 1.0);
    }

    #[test]
    fn confidence_wins_over_composite_score() {
        let detections = parse_detections(
            r#"[
                {"bbox": [10, 20, 110, 220], "confidence": 0.9, "score": 0.7,
                 "class_name": "suitcase", "category": "BAGS", "priority": 0.9},
                {"box": [0, 0, 10, 10], "conf": 0.55, "score": 0.2, "class": "cup"},
                {"xyxy": [0, 0, 10, 10], "score": 0.65, "label": "book", "name": "ignored"}
            ]"#,
        )
        .unwrap();
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].raw_label, "suitcase");
        assert_eq!(detections[1].confidence, 0.55);
        assert_eq!(detections[2].confidence, 0.65);
        assert_eq!(detections[2].raw_label, "book");
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_detections(r#"[{"bbox": [1, 2, 3], "score": 0.5, "class": "bag"}]"#).is_err());
        assert!(parse_detections(r#"[{"bbox": [1, 2, 3, 4], "class": "bag"}]"#).is_err());
        assert!(parse_detections(r#"[{"bbox": [1, 2, 3, 4], "score": 0.5}]"#).is_err());
        assert!(parse_detections(r#"[{"score": 0.5, "class": "bag"}]"#).is_err());
        assert!(parse_detections("not json").is_err());
    }
}
