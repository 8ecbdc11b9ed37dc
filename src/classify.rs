//! Category classifier.
//!
//! Maps a raw detector label onto the fixed category set. Lookup order:
//! exact table hit, exact confusable hit, substring table hit (either
//! direction), then the unknown-label policy. `Person` and confusable
//! labels only ever match exactly.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::config::{CategoryProfile, ClassifierSettings, UnknownLabelPolicy};
use crate::{Category, ClassifiedDetection, FrameDims, RawDetection};

/// Labels shorter than this never match as a substring of a table key.
const MIN_SUBSTRING_LABEL_LEN: usize = 4;

fn separator_regex() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[\s_\-]+").expect("valid separator regex"))
}

/// Lowercase and collapse `_`, `-` and whitespace runs to single spaces.
pub fn normalize_label(raw: &str) -> String {
    separator_regex()
        .replace_all(raw.trim(), " ")
        .trim()
        .to_lowercase()
}

#[derive(Clone, Debug)]
pub struct CategoryClassifier {
    labels: BTreeMap<String, Category>,
    profiles: BTreeMap<Category, CategoryProfile>,
    confusable_labels: BTreeSet<String>,
    confusable_category: Category,
    confusable_min_confidence: f64,
    unknown_label_policy: UnknownLabelPolicy,
    confidence_threshold: f64,
    max_area_ratio: f64,
    min_side_px: f64,
}

impl CategoryClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            labels: settings.labels.clone(),
            profiles: settings.profiles.clone(),
            confusable_labels: settings.confusable_labels.clone(),
            confusable_category: settings.confusable_category,
            confusable_min_confidence: settings.confusable_min_confidence,
            unknown_label_policy: settings.unknown_label_policy,
            confidence_threshold: settings.confidence_threshold,
            max_area_ratio: settings.max_area_ratio,
            min_side_px: settings.min_side_px,
        }
    }

    pub fn priority(&self, category: Category) -> f64 {
        self.profiles
            .get(&category)
            .map(|profile| profile.priority)
            .unwrap_or(0.0)
    }

    /// Label-level classification. Never fails; an unmapped label is `Excluded`
    /// unless the unknown-label policy says otherwise.
    pub fn classify(&self, raw_label: &str, confidence: Option<f64>) -> (Category, f64) {
        let category = self.category_for(raw_label, confidence);
        (category, self.priority(category))
    }

    fn category_for(&self, raw_label: &str, confidence: Option<f64>) -> Category {
        let label = normalize_label(raw_label);
        if label.is_empty() {
            return Category::Excluded;
        }
        if let Some(category) = self.labels.get(&label) {
            return *category;
        }
        if self.confusable_labels.contains(&label) {
            return self.confusable_outcome(&label, confidence);
        }
        if let Some(category) = self.substring_match(&label) {
            return category;
        }
        match self.unknown_label_policy {
            UnknownLabelPolicy::Exclude => Category::Excluded,
            UnknownLabelPolicy::Include(category) => {
                log::debug!("unknown label {:?} included as {}", label, category);
                category
            }
        }
    }

    fn confusable_outcome(&self, label: &str, confidence: Option<f64>) -> Category {
        match confidence {
            Some(conf) if conf >= self.confusable_min_confidence => {
                log::debug!(
                    "confusable label {:?} accepted as {} at confidence {:.2}",
                    label,
                    self.confusable_category,
                    conf
                );
                self.confusable_category
            }
            _ => Category::Excluded,
        }
    }

    /// Longest matching key wins; ties go to the alphabetically first key.
    /// `Person` keys are skipped so "personal bag" never counts as a custodian.
    fn substring_match(&self, label: &str) -> Option<Category> {
        self.labels
            .iter()
            .filter(|(_, category)| **category != Category::Person)
            .filter(|(key, _)| {
                label.contains(key.as_str())
                    || (label.len() >= MIN_SUBSTRING_LABEL_LEN && key.contains(label))
            })
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, category)| *category)
    }

    /// Classify a detection and apply the confidence and size gates.
    ///
    /// Lost-item detections failing a gate are downgraded to `Excluded`.
    /// `Person` detections pass through untouched; attendance applies its own floor.
    pub fn classify_detection(
        &self,
        detection: RawDetection,
        frame: FrameDims,
    ) -> ClassifiedDetection {
        let (mut category, _) = self.classify(&detection.raw_label, Some(detection.confidence));
        if category.is_lost_item() {
            if let Some(reason) = self.gate_failure(category, &detection, frame) {
                log::debug!(
                    "{:?} ({}) excluded: {}",
                    detection.raw_label,
                    category,
                    reason
                );
                category = Category::Excluded;
            }
        }
        ClassifiedDetection {
            category_priority: self.priority(category),
            category,
            detection,
        }
    }

    fn gate_failure(
        &self,
        category: Category,
        detection: &RawDetection,
        frame: FrameDims,
    ) -> Option<String> {
        let confidence = detection.confidence;
        if !(confidence >= self.confidence_threshold) {
            return Some(format!(
                "confidence {:.2} below threshold {:.2}",
                confidence, self.confidence_threshold
            ));
        }
        let profile = self.profiles.get(&category)?;
        if confidence < profile.min_confidence {
            return Some(format!(
                "confidence {:.2} below {} minimum {:.2}",
                confidence, category, profile.min_confidence
            ));
        }
        let bbox = &detection.bbox;
        if !bbox.is_finite() {
            return Some("non-finite bbox".to_string());
        }
        if bbox.width() < self.min_side_px || bbox.height() < self.min_side_px {
            return Some(format!(
                "bbox {:.0}x{:.0} smaller than {:.0}px",
                bbox.width(),
                bbox.height(),
                self.min_side_px
            ));
        }
        if frame.is_empty() {
            return Some("empty frame".to_string());
        }
        let area_ratio = bbox.area() / frame.area();
        if area_ratio < profile.min_size_ratio {
            return Some(format!(
                "area ratio {:.5} below {} minimum {:.5}",
                area_ratio, category, profile.min_size_ratio
            ));
        }
        if area_ratio > self.max_area_ratio {
            return Some(format!(
                "area ratio {:.3} above maximum {:.3}",
                area_ratio, self.max_area_ratio
            ));
        }
        None
    }
}
