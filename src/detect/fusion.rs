//! Ensemble of detector variants.
//!
//! Members run in parallel scoped threads; their outputs are fused in a single
//! deterministic pass afterwards, so results never depend on thread timing.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

use crate::classify::normalize_label;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::ingest::SampledFrame;
use crate::{BBox, RawDetection};

pub const DEFAULT_FUSION_IOU: f64 = 0.3;
const MAX_FUSED_CONFIDENCE: f64 = 0.99;

pub struct EnsembleMember {
    pub backend: Box<dyn DetectorBackend>,
    pub weight: f64,
}

pub struct EnsembleDetector {
    members: Vec<EnsembleMember>,
    iou_threshold: f64,
}

impl EnsembleDetector {
    pub fn new(iou_threshold: f64) -> Self {
        Self {
            members: Vec::new(),
            iou_threshold,
        }
    }

    pub fn with_member<B: DetectorBackend + 'static>(mut self, backend: B, weight: f64) -> Self {
        self.members.push(EnsembleMember {
            backend: Box::new(backend),
            weight,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl DetectorBackend for EnsembleDetector {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        self.members
            .iter()
            .any(|member| member.backend.supports(capability))
    }

    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>> {
        if self.members.is_empty() {
            return Err(anyhow!("ensemble has no members"));
        }
        let outputs: Vec<(f64, Result<Vec<RawDetection>>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter_mut()
                .map(|member| {
                    let weight = member.weight;
                    let handle = scope.spawn(move || member.backend.detect(frame));
                    (weight, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(weight, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("detector thread panicked")));
                    (weight, result)
                })
                .collect()
        });

        let mut succeeded = Vec::new();
        let mut last_error = None;
        for (idx, (weight, result)) in outputs.into_iter().enumerate() {
            match result {
                Ok(detections) => succeeded.push((weight, detections)),
                Err(err) => {
                    log::warn!("ensemble member {} failed: {}", idx, err);
                    last_error = Some(err);
                }
            }
        }
        if succeeded.is_empty() {
            return Err(last_error.unwrap_or_else(|| anyhow!("every ensemble member failed")));
        }
        Ok(fuse_detections(&succeeded, self.iou_threshold))
    }

    fn warm_up(&mut self) -> Result<()> {
        for member in &mut self.members {
            member.backend.warm_up()?;
        }
        Ok(())
    }
}

struct Group<'a> {
    anchor: BBox,
    person: bool,
    members: Vec<(f64, &'a RawDetection)>,
}

fn is_person(label: &str) -> bool {
    normalize_label(label) == "person"
}

/// Group detections whose boxes overlap by more than `iou_threshold` and merge
/// each group into one detection.
///
/// Within a group the box is the confidence-and-weight averaged box, the
/// confidence is the weight-averaged confidence (capped at 0.99), and the label
/// wins by summed weighted confidence. Persons never merge with objects.
pub fn fuse_detections(outputs: &[(f64, Vec<RawDetection>)], iou_threshold: f64) -> Vec<RawDetection> {
    let mut entries: Vec<(f64, &RawDetection)> = outputs
        .iter()
        .flat_map(|(weight, detections)| detections.iter().map(move |det| (*weight, det)))
        .collect();
    // Strongest evidence seeds groups; stable sort keeps member order for ties.
    entries.sort_by(|a, b| (b.0 * b.1.confidence).total_cmp(&(a.0 * a.1.confidence)));

    let mut groups: Vec<Group<'_>> = Vec::new();
    for (weight, detection) in entries {
        let person = is_person(&detection.raw_label);
        match groups
            .iter_mut()
            .find(|group| group.person == person && group.anchor.iou(&detection.bbox) > iou_threshold)
        {
            Some(group) => group.members.push((weight, detection)),
            None => groups.push(Group {
                anchor: detection.bbox,
                person,
                members: vec![(weight, detection)],
            }),
        }
    }

    groups.iter().map(merge_group).collect()
}

fn merge_group(group: &Group<'_>) -> RawDetection {
    let weight_sum: f64 = group.members.iter().map(|(w, _)| *w).sum();
    let mass: f64 = group
        .members
        .iter()
        .map(|(w, det)| w * det.confidence)
        .sum();

    let bbox = if mass > 0.0 {
        let coord = |pick: fn(&BBox) -> f64| {
            group
                .members
                .iter()
                .map(|(w, det)| w * det.confidence * pick(&det.bbox))
                .sum::<f64>()
                / mass
        };
        BBox::new(
            coord(|b| b.x1),
            coord(|b| b.y1),
            coord(|b| b.x2),
            coord(|b| b.y2),
        )
    } else {
        group.anchor
    };

    let confidence = if weight_sum > 0.0 {
        (mass / weight_sum).min(MAX_FUSED_CONFIDENCE)
    } else {
        0.0
    };

    let mut votes: BTreeMap<String, f64> = BTreeMap::new();
    for (w, det) in &group.members {
        *votes.entry(normalize_label(&det.raw_label)).or_insert(0.0) += w * det.confidence;
    }
    let mut raw_label = String::new();
    let mut best = f64::NEG_INFINITY;
    for (label, score) in votes {
        if score > best {
            best = score;
            raw_label = label;
        }
    }

    RawDetection {
        bbox,
        confidence,
        raw_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ReplayBackend;
    use image::RgbImage;

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64, label: &str) -> RawDetection {
        RawDetection::new(BBox::new(x1, y1, x2, y2), confidence, label)
    }

    #[test]
    fn overlapping_boxes_fuse_with_weighted_vote() {
        let outputs = vec![
            (1.0, vec![det(100.0, 100.0, 200.0, 200.0, 0.8, "suitcase")]),
            (0.5, vec![det(110.0, 100.0, 210.0, 200.0, 0.6, "backpack")]),
            (1.0, vec![det(400.0, 400.0, 450.0, 450.0, 0.7, "cup")]),
        ];
        let fused = fuse_detections(&outputs, DEFAULT_FUSION_IOU);
        assert_eq!(fused.len(), 2);

        let bag = &fused[0];
        assert_eq!(bag.raw_label, "suitcase");
        // (1.0*0.8 + 0.5*0.6) / 1.5
        assert!((bag.confidence - 1.1 / 1.5).abs() < 1e-12);
        // x1 = (0.8*100 + 0.3*110) / 1.1
        assert!((bag.bbox.x1 - 113.0 / 1.1).abs() < 1e-9);
        assert_eq!(fused[1].raw_label, "cup");
    }

    #[test]
    fn persons_do_not_merge_with_objects() {
        let outputs = vec![(
            1.0,
            vec![
                det(100.0, 100.0, 200.0, 300.0, 0.9, "person"),
                det(100.0, 150.0, 200.0, 300.0, 0.8, "backpack"),
            ],
        )];
        let fused = fuse_detections(&outputs, DEFAULT_FUSION_IOU);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn confidence_is_capped() {
        let outputs = vec![
            (1.0, vec![det(0.0, 0.0, 50.0, 50.0, 1.0, "bag")]),
            (1.0, vec![det(0.0, 0.0, 50.0, 50.0, 1.0, "bag")]),
        ];
        let fused = fuse_detections(&outputs, DEFAULT_FUSION_IOU);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].confidence, 0.99);
    }

    #[test]
    fn ensemble_runs_members_and_fuses() {
        let mut first = std::collections::BTreeMap::new();
        first.insert(0, vec![det(10.0, 10.0, 60.0, 60.0, 0.9, "laptop")]);
        let mut second = std::collections::BTreeMap::new();
        second.insert(0, vec![det(12.0, 10.0, 62.0, 60.0, 0.7, "laptop")]);

        let mut ensemble = EnsembleDetector::new(DEFAULT_FUSION_IOU)
            .with_member(ReplayBackend::from_frames(first), 1.0)
            .with_member(ReplayBackend::from_frames(second), 1.0);
        assert_eq!(ensemble.len(), 2);
        assert!(ensemble.supports(DetectionCapability::ObjectDetection));

        let frame = SampledFrame {
            frame_number: 0,
            timestamp_s: 0.0,
            image: RgbImage::new(100, 100),
        };
        let fused = ensemble.detect(&frame).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].raw_label, "laptop");
        assert!((fused[0].confidence - 0.8).abs() < 1e-12);
    }
}
