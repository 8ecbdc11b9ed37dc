//! Composite candidate score.
//!
//! Each weighted term is clamped to its own share before summing, so a
//! single runaway input can never dominate the score.

use crate::config::{ScoreWeights, ScoringSettings};
use crate::select::Candidate;
use crate::{BBox, FrameDims};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub confidence: f64,
    pub priority: f64,
    pub size: f64,
    pub position: f64,
    pub consistency_bonus: f64,
    pub total: f64,
}

#[derive(Clone, Debug)]
pub struct CandidateScorer {
    settings: ScoringSettings,
}

impl CandidateScorer {
    pub fn new(settings: ScoringSettings) -> Self {
        Self { settings }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.settings.weights
    }

    pub fn consistency_window(&self) -> usize {
        self.settings.consistency_window
    }

    pub fn score(&self, candidate: &Candidate, frame: FrameDims) -> f64 {
        self.breakdown(candidate, frame).total
    }

    pub fn breakdown(&self, candidate: &Candidate, frame: FrameDims) -> ScoreBreakdown {
        self.breakdown_parts(
            candidate.bbox(),
            candidate.confidence(),
            candidate.detection.category_priority,
            candidate.category_recurrence,
            frame,
        )
    }

    pub fn breakdown_parts(
        &self,
        bbox: &BBox,
        confidence: f64,
        category_priority: f64,
        category_recurrence: usize,
        frame: FrameDims,
    ) -> ScoreBreakdown {
        let weights = self.settings.weights;
        let area_ratio = if frame.is_empty() {
            0.0
        } else {
            bbox.area() / frame.area()
        };

        let confidence_term = clamp_term(confidence * weights.confidence, weights.confidence);
        let priority_term = clamp_term(category_priority * weights.priority, weights.priority);
        let size_term = clamp_term(self.size_score(area_ratio) * weights.size, weights.size);
        let position_term = clamp_term(
            (1.0 - 2.0 * center_offset(bbox, frame)) * weights.position,
            weights.position,
        );

        let base = clamp_term(
            confidence_term + priority_term + size_term + position_term,
            1.0,
        );
        let consistency_bonus = if category_recurrence >= self.settings.consistency_min_repeats {
            self.settings.consistency_bonus.min(1.0 - base)
        } else {
            0.0
        };

        ScoreBreakdown {
            confidence: confidence_term,
            priority: priority_term,
            size: size_term,
            position: position_term,
            consistency_bonus,
            total: base + consistency_bonus,
        }
    }

    /// 1.0 at the optimal area ratio, falling linearly to 0 at zero area and at
    /// `size_falloff_ratio`.
    pub fn size_score(&self, area_ratio: f64) -> f64 {
        let optimal = self.settings.optimal_area_ratio;
        let falloff = self.settings.size_falloff_ratio;
        if !(area_ratio > 0.0) {
            return 0.0;
        }
        let score = if area_ratio <= optimal {
            area_ratio / optimal
        } else {
            (falloff - area_ratio) / (falloff - optimal)
        };
        score.clamp(0.0, 1.0)
    }
}

/// Distance from the bbox center to the frame center with each axis scaled
/// by its frame side. 0 at the center, 0.5 at an edge midpoint, about 0.707
/// at a corner.
pub fn center_offset(bbox: &BBox, frame: FrameDims) -> f64 {
    if frame.is_empty() {
        return 1.0;
    }
    let (cx, cy) = bbox.center();
    let dx = cx / frame.width as f64 - 0.5;
    let dy = cy / frame.height as f64 - 0.5;
    (dx * dx + dy * dy).sqrt()
}

fn clamp_term(value: f64, share: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, share)
}
