//! Candidate pool and best-candidate selection.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::crop::CropRect;
use crate::{BBox, Category, ClassifiedDetection};

/// A classified, tracked, scored detection from one sampled frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub detection: ClassifiedDetection,
    pub track_id: u64,
    pub frame_number: u64,
    pub timestamp_s: f64,
    pub attended: bool,
    pub score: f64,
    /// Observations of this category in the track's recent window.
    pub category_recurrence: usize,
}

impl Candidate {
    pub fn category(&self) -> Category {
        self.detection.category
    }

    pub fn confidence(&self) -> f64 {
        self.detection.confidence()
    }

    pub fn bbox(&self) -> &BBox {
        self.detection.bbox()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub avg_confidence: f64,
}

/// Candidates accumulated over one video or image batch.
///
/// Only unattended lost-item candidates are admitted.
#[derive(Clone, Debug, Default)]
pub struct CandidatePool {
    candidates: Vec<Candidate>,
    rejected: usize,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and keeps the pool unchanged) for attended candidates and
    /// for `Person` / `Excluded` categories.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if candidate.attended || !candidate.category().is_lost_item() {
            self.rejected += 1;
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn category_stats(&self) -> BTreeMap<Category, CategoryStats> {
        let mut sums: BTreeMap<Category, (usize, f64)> = BTreeMap::new();
        for candidate in &self.candidates {
            let entry = sums.entry(candidate.category()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += candidate.confidence();
        }
        sums.into_iter()
            .map(|(category, (count, total))| {
                (
                    category,
                    CategoryStats {
                        count,
                        avg_confidence: total / count as f64,
                    },
                )
            })
            .collect()
    }
}

/// Winner of a processing pass, with its crop once one has been attached.
#[derive(Clone, Debug, Default)]
pub struct SelectionResult {
    pub winner: Option<Candidate>,
    pub crop_region: Option<CropRect>,
    pub crop_image: Option<RgbImage>,
    /// True when the crop fell back to a center crop.
    pub crop_fallback: bool,
    pub category_stats: BTreeMap<Category, CategoryStats>,
}

impl SelectionResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn object_found(&self) -> bool {
        self.winner.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct BestCandidateSelector {
    priority_categories: Vec<Category>,
}

impl BestCandidateSelector {
    pub fn new(priority_categories: Vec<Category>) -> Self {
        Self {
            priority_categories,
        }
    }

    pub fn is_priority(&self, category: Category) -> bool {
        self.priority_categories.contains(&category)
    }

    /// Highest score inside the priority partition if it is non-empty, else
    /// across the whole pool. Ties go to the earliest timestamp, then frame
    /// number, then track id.
    pub fn best<'a>(&self, pool: &'a CandidatePool) -> Option<&'a Candidate> {
        let has_priority = pool
            .candidates()
            .iter()
            .any(|candidate| self.is_priority(candidate.category()));
        pool.candidates()
            .iter()
            .filter(|candidate| !has_priority || self.is_priority(candidate.category()))
            .min_by(|a, b| rank(a, b))
    }

    pub fn select(&self, pool: &CandidatePool) -> SelectionResult {
        match self.best(pool) {
            Some(winner) => SelectionResult {
                winner: Some(winner.clone()),
                category_stats: pool.category_stats(),
                ..SelectionResult::default()
            },
            None => SelectionResult::not_found(),
        }
    }
}

/// `Less` means `a` is the better candidate.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.timestamp_s.total_cmp(&b.timestamp_s))
        .then_with(|| a.frame_number.cmp(&b.frame_number))
        .then_with(|| a.track_id.cmp(&b.track_id))
}
