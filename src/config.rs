use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use crate::classify::normalize_label;
use crate::Category;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.3;
const DEFAULT_CONFUSABLE_MIN_CONFIDENCE: f64 = 0.8;
const DEFAULT_MAX_AREA_RATIO: f64 = 0.8;
const DEFAULT_MIN_SIDE_PX: f64 = 10.0;
const DEFAULT_PERSON_MIN_CONFIDENCE: f64 = 0.5;
const DEFAULT_SCENE_FACTOR: f64 = 0.2;
const DEFAULT_OBJECT_FACTOR: f64 = 2.0;
const DEFAULT_STATIONARY_THRESHOLD_PX: f64 = 30.0;
const DEFAULT_STATIONARY_FRAMES: u32 = 30;
const DEFAULT_MIN_DETECTION_INTERVAL_S: f64 = 0.5;
const DEFAULT_MAX_TRACKING_DISTANCE_PX: f64 = 100.0;
const DEFAULT_MAX_MISSED_UPDATES: u32 = 10;
const DEFAULT_CATEGORY_WINDOW: usize = 5;
const DEFAULT_CATEGORY_MAJORITY: f64 = 0.75;
const DEFAULT_HISTORY_LIMIT: usize = 64;
const DEFAULT_OPTIMAL_AREA_RATIO: f64 = 0.05;
const DEFAULT_CONSISTENCY_BONUS: f64 = 0.05;
const DEFAULT_CONSISTENCY_WINDOW: usize = 5;
const DEFAULT_CONSISTENCY_MIN_REPEATS: usize = 3;
const DEFAULT_EARLY_STOP_CONFIDENCE: f64 = 0.8;
const DEFAULT_MIN_CROP_SIZE: u32 = 200;
const DEFAULT_BASE_PADDING: f64 = 1.5;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

const DEFAULT_LABELS: &[(&str, Category)] = &[
    ("suitcase", Category::Bags),
    ("luggage", Category::Bags),
    ("backpack", Category::Bags),
    ("handbag", Category::Bags),
    ("bag", Category::Bags),
    ("purse", Category::Bags),
    ("briefcase", Category::Bags),
    ("duffel bag", Category::Bags),
    ("cell phone", Category::Electronics),
    ("mobile phone", Category::Electronics),
    ("laptop", Category::Electronics),
    ("tablet", Category::Electronics),
    ("camera", Category::Electronics),
    ("keyboard", Category::Electronics),
    ("mouse", Category::Electronics),
    ("headphones", Category::Electronics),
    ("charger", Category::Electronics),
    ("power bank", Category::Electronics),
    ("wallet", Category::Personal),
    ("keys", Category::Personal),
    ("sunglasses", Category::Personal),
    ("glasses", Category::Personal),
    ("watch", Category::Personal),
    ("jewelry", Category::Personal),
    ("ring", Category::Personal),
    ("necklace", Category::Personal),
    ("bracelet", Category::Personal),
    ("hat", Category::Clothing),
    ("cap", Category::Clothing),
    ("jacket", Category::Clothing),
    ("coat", Category::Clothing),
    ("scarf", Category::Clothing),
    ("gloves", Category::Clothing),
    ("shoes", Category::Clothing),
    ("sneakers", Category::Clothing),
    ("boots", Category::Clothing),
    ("shirt", Category::Clothing),
    ("pants", Category::Clothing),
    ("book", Category::Miscellaneous),
    ("bottle", Category::Miscellaneous),
    ("cup", Category::Miscellaneous),
    ("umbrella", Category::Miscellaneous),
    ("sports ball", Category::Miscellaneous),
    ("teddy bear", Category::Miscellaneous),
    ("toy", Category::Miscellaneous),
    ("document", Category::Miscellaneous),
    ("paper", Category::Miscellaneous),
    ("folder", Category::Miscellaneous),
    ("pen", Category::Miscellaneous),
    ("pencil", Category::Miscellaneous),
    ("person", Category::Person),
];

/// Detector classes that often fire on bags at low confidence.
const DEFAULT_CONFUSABLE_LABELS: &[&str] = &["dog", "cat", "bear", "sheep", "cow", "horse", "train"];

/// (upper area ratio, padding factor), ascending.
const DEFAULT_PADDING_TIERS: &[(f64, f64)] = &[(0.01, 3.0), (0.05, 2.5), (0.15, 2.0)];

fn default_profile(category: Category) -> CategoryProfile {
    let (priority, min_size_ratio, min_confidence) = match category {
        Category::Bags => (0.9, 0.0001, 0.5),
        Category::Electronics => (0.95, 0.0005, 0.6),
        Category::Personal => (0.9, 0.0002, 0.7),
        Category::Clothing => (0.7, 0.002, 0.6),
        Category::Miscellaneous => (0.6, 0.0008, 0.7),
        Category::Person | Category::Excluded => (0.0, 0.0, 0.0),
    };
    CategoryProfile {
        priority,
        min_size_ratio,
        min_confidence,
    }
}

// -------------------- File representation --------------------

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    confidence_threshold: Option<f64>,
    unknown_label_policy: Option<String>,
    classifier: Option<ClassifierConfigFile>,
    categories: Option<BTreeMap<String, CategoryConfigFile>>,
    labels: Option<BTreeMap<String, String>>,
    proximity: Option<ProximityConfigFile>,
    tracking: Option<TrackingConfigFile>,
    scoring: Option<ScoringConfigFile>,
    selection: Option<SelectionConfigFile>,
    crop: Option<CropConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    confusable_labels: Option<Vec<String>>,
    confusable_category: Option<String>,
    confusable_min_confidence: Option<f64>,
    max_area_ratio: Option<f64>,
    min_side_px: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CategoryConfigFile {
    priority: Option<f64>,
    min_size_ratio: Option<f64>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    person_min_confidence: Option<f64>,
    scene_factor: Option<f64>,
    object_factor: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    stationary_threshold_px: Option<f64>,
    stationary_frames: Option<u32>,
    min_detection_interval_s: Option<f64>,
    max_tracking_distance_px: Option<f64>,
    max_missed_updates: Option<u32>,
    category_window: Option<usize>,
    category_majority: Option<f64>,
    require_stationary: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ScoringConfigFile {
    weights: Option<WeightsConfigFile>,
    optimal_area_ratio: Option<f64>,
    size_falloff_ratio: Option<f64>,
    consistency_bonus: Option<f64>,
    consistency_window: Option<usize>,
    consistency_min_repeats: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct WeightsConfigFile {
    confidence: Option<f64>,
    priority: Option<f64>,
    size: Option<f64>,
    position: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SelectionConfigFile {
    priority_categories: Option<Vec<String>>,
    early_stop_after: Option<usize>,
    early_stop_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CropConfigFile {
    padding_tiers: Option<Vec<PaddingTierConfigFile>>,
    base_padding: Option<f64>,
    min_crop_size: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct PaddingTierConfigFile {
    max_area_ratio: f64,
    factor: f64,
}

// -------------------- Settings --------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CategoryProfile {
    pub priority: f64,
    pub min_size_ratio: f64,
    pub min_confidence: f64,
}

/// What to do with labels that match nothing in the label table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownLabelPolicy {
    Exclude,
    Include(Category),
}

impl UnknownLabelPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("exclude") {
            return Ok(UnknownLabelPolicy::Exclude);
        }
        match Category::parse(trimmed) {
            Some(category) if category.is_lost_item() => Ok(UnknownLabelPolicy::Include(category)),
            _ => Err(anyhow!(
                "unknown_label_policy must be \"exclude\" or a lost-item category, got {:?}",
                value
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassifierSettings {
    pub confidence_threshold: f64,
    pub profiles: BTreeMap<Category, CategoryProfile>,
    /// Normalized label → category.
    pub labels: BTreeMap<String, Category>,
    pub confusable_labels: BTreeSet<String>,
    pub confusable_category: Category,
    pub confusable_min_confidence: f64,
    pub unknown_label_policy: UnknownLabelPolicy,
    pub max_area_ratio: f64,
    pub min_side_px: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            profiles: Category::LOST_ITEMS
                .iter()
                .map(|category| (*category, default_profile(*category)))
                .collect(),
            labels: DEFAULT_LABELS
                .iter()
                .map(|(label, category)| (label.to_string(), *category))
                .collect(),
            confusable_labels: DEFAULT_CONFUSABLE_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
            confusable_category: Category::Bags,
            confusable_min_confidence: DEFAULT_CONFUSABLE_MIN_CONFIDENCE,
            unknown_label_policy: UnknownLabelPolicy::Exclude,
            max_area_ratio: DEFAULT_MAX_AREA_RATIO,
            min_side_px: DEFAULT_MIN_SIDE_PX,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProximitySettings {
    pub person_min_confidence: f64,
    pub scene_factor: f64,
    pub object_factor: f64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            person_min_confidence: DEFAULT_PERSON_MIN_CONFIDENCE,
            scene_factor: DEFAULT_SCENE_FACTOR,
            object_factor: DEFAULT_OBJECT_FACTOR,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackingSettings {
    pub stationary_threshold_px: f64,
    pub stationary_frames: u32,
    pub min_detection_interval_s: f64,
    pub max_tracking_distance_px: f64,
    pub max_missed_updates: u32,
    pub category_window: usize,
    pub category_majority: f64,
    pub history_limit: usize,
    pub require_stationary: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            stationary_threshold_px: DEFAULT_STATIONARY_THRESHOLD_PX,
            stationary_frames: DEFAULT_STATIONARY_FRAMES,
            min_detection_interval_s: DEFAULT_MIN_DETECTION_INTERVAL_S,
            max_tracking_distance_px: DEFAULT_MAX_TRACKING_DISTANCE_PX,
            max_missed_updates: DEFAULT_MAX_MISSED_UPDATES,
            category_window: DEFAULT_CATEGORY_WINDOW,
            category_majority: DEFAULT_CATEGORY_MAJORITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            require_stationary: false,
        }
    }
}

/// Composite score weights. Must sum to 1.0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreWeights {
    pub confidence: f64,
    pub priority: f64,
    pub size: f64,
    pub position: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.confidence + self.priority + self.size + self.position
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            priority: 0.3,
            size: 0.2,
            position: 0.1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScoringSettings {
    pub weights: ScoreWeights,
    pub optimal_area_ratio: f64,
    /// Area ratio where the size term reaches 0 above the optimum.
    pub size_falloff_ratio: f64,
    pub consistency_bonus: f64,
    pub consistency_window: usize,
    pub consistency_min_repeats: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            optimal_area_ratio: DEFAULT_OPTIMAL_AREA_RATIO,
            size_falloff_ratio: 2.0 * DEFAULT_OPTIMAL_AREA_RATIO,
            consistency_bonus: DEFAULT_CONSISTENCY_BONUS,
            consistency_window: DEFAULT_CONSISTENCY_WINDOW,
            consistency_min_repeats: DEFAULT_CONSISTENCY_MIN_REPEATS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SelectionSettings {
    pub priority_categories: Vec<Category>,
    /// Stop sampling once this many confident priority candidates are pooled.
    pub early_stop_after: Option<usize>,
    pub early_stop_confidence: f64,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            priority_categories: vec![Category::Bags],
            early_stop_after: None,
            early_stop_confidence: DEFAULT_EARLY_STOP_CONFIDENCE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaddingTier {
    /// Applies when the bbox area ratio is strictly below this value.
    pub max_area_ratio: f64,
    pub factor: f64,
}

#[derive(Clone, Debug)]
pub struct CropSettings {
    pub tiers: Vec<PaddingTier>,
    /// Padding for boxes above every tier; also the floor for all tiers.
    pub base_padding: f64,
    pub min_crop_size: u32,
    pub jpeg_quality: u8,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_PADDING_TIERS
                .iter()
                .map(|(max_area_ratio, factor)| PaddingTier {
                    max_area_ratio: *max_area_ratio,
                    factor: *factor,
                })
                .collect(),
            base_padding: DEFAULT_BASE_PADDING,
            min_crop_size: DEFAULT_MIN_CROP_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Complete engine configuration, handed over once at construction time.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub classifier: ClassifierSettings,
    pub proximity: ProximitySettings,
    pub tracking: TrackingSettings,
    pub scoring: ScoringSettings,
    pub selection: SelectionSettings,
    pub crop: CropSettings,
}

impl EngineConfig {
    /// Load from the file named by `LOSTFOUND_CONFIG` (if set), then apply
    /// `LOSTFOUND_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LOSTFOUND_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as [`EngineConfig::load`] with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        let classifier = &mut cfg.classifier;
        if let Some(threshold) = file.confidence_threshold {
            classifier.confidence_threshold = threshold;
        }
        if let Some(policy) = file.unknown_label_policy.as_deref() {
            classifier.unknown_label_policy = UnknownLabelPolicy::parse(policy)?;
        }
        if let Some(section) = file.classifier {
            if let Some(labels) = section.confusable_labels {
                classifier.confusable_labels = labels
                    .iter()
                    .map(|label| normalize_label(label))
                    .filter(|label| !label.is_empty())
                    .collect();
            }
            if let Some(category) = section.confusable_category.as_deref() {
                classifier.confusable_category = parse_category(category)?;
            }
            if let Some(value) = section.confusable_min_confidence {
                classifier.confusable_min_confidence = value;
            }
            if let Some(value) = section.max_area_ratio {
                classifier.max_area_ratio = value;
            }
            if let Some(value) = section.min_side_px {
                classifier.min_side_px = value;
            }
        }
        for (name, profile_file) in file.categories.unwrap_or_default() {
            let category = parse_category(&name)?;
            let profile = classifier
                .profiles
                .get_mut(&category)
                .ok_or_else(|| anyhow!("category {} cannot carry a profile", category))?;
            if let Some(value) = profile_file.priority {
                profile.priority = value;
            }
            if let Some(value) = profile_file.min_size_ratio {
                profile.min_size_ratio = value;
            }
            if let Some(value) = profile_file.min_confidence {
                profile.min_confidence = value;
            }
        }
        for (label, category) in file.labels.unwrap_or_default() {
            let key = normalize_label(&label);
            if key.is_empty() {
                return Err(anyhow!("label table contains an empty label"));
            }
            classifier.labels.insert(key, parse_category(&category)?);
        }

        if let Some(section) = file.proximity {
            let proximity = &mut cfg.proximity;
            if let Some(value) = section.person_min_confidence {
                proximity.person_min_confidence = value;
            }
            if let Some(value) = section.scene_factor {
                proximity.scene_factor = value;
            }
            if let Some(value) = section.object_factor {
                proximity.object_factor = value;
            }
        }

        if let Some(section) = file.tracking {
            let tracking = &mut cfg.tracking;
            if let Some(value) = section.stationary_threshold_px {
                tracking.stationary_threshold_px = value;
            }
            if let Some(value) = section.stationary_frames {
                tracking.stationary_frames = value;
            }
            if let Some(value) = section.min_detection_interval_s {
                tracking.min_detection_interval_s = value;
            }
            if let Some(value) = section.max_tracking_distance_px {
                tracking.max_tracking_distance_px = value;
            }
            if let Some(value) = section.max_missed_updates {
                tracking.max_missed_updates = value;
            }
            if let Some(value) = section.category_window {
                tracking.category_window = value;
            }
            if let Some(value) = section.category_majority {
                tracking.category_majority = value;
            }
            if let Some(value) = section.require_stationary {
                tracking.require_stationary = value;
            }
        }

        if let Some(section) = file.scoring {
            let scoring = &mut cfg.scoring;
            if let Some(weights) = section.weights {
                if let Some(value) = weights.confidence {
                    scoring.weights.confidence = value;
                }
                if let Some(value) = weights.priority {
                    scoring.weights.priority = value;
                }
                if let Some(value) = weights.size {
                    scoring.weights.size = value;
                }
                if let Some(value) = weights.position {
                    scoring.weights.position = value;
                }
            }
            if let Some(value) = section.optimal_area_ratio {
                scoring.optimal_area_ratio = value;
                scoring.size_falloff_ratio = 2.0 * value;
            }
            if let Some(value) = section.size_falloff_ratio {
                scoring.size_falloff_ratio = value;
            }
            if let Some(value) = section.consistency_bonus {
                scoring.consistency_bonus = value;
            }
            if let Some(value) = section.consistency_window {
                scoring.consistency_window = value;
            }
            if let Some(value) = section.consistency_min_repeats {
                scoring.consistency_min_repeats = value;
            }
        }

        if let Some(section) = file.selection {
            let selection = &mut cfg.selection;
            if let Some(categories) = section.priority_categories {
                selection.priority_categories = categories
                    .iter()
                    .map(|name| parse_category(name))
                    .collect::<Result<Vec<_>>>()?;
            }
            if section.early_stop_after.is_some() {
                selection.early_stop_after = section.early_stop_after;
            }
            if let Some(value) = section.early_stop_confidence {
                selection.early_stop_confidence = value;
            }
        }

        if let Some(section) = file.crop {
            let crop = &mut cfg.crop;
            if let Some(tiers) = section.padding_tiers {
                crop.tiers = tiers
                    .into_iter()
                    .map(|tier| PaddingTier {
                        max_area_ratio: tier.max_area_ratio,
                        factor: tier.factor,
                    })
                    .collect();
            }
            if let Some(value) = section.base_padding {
                crop.base_padding = value;
            }
            if let Some(value) = section.min_crop_size {
                crop.min_crop_size = value;
            }
            if let Some(value) = section.jpeg_quality {
                crop.jpeg_quality = value;
            }
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<f64>("LOSTFOUND_CONFIDENCE_THRESHOLD")? {
            self.classifier.confidence_threshold = value;
        }
        if let Some(value) = env_parse::<u32>("LOSTFOUND_STATIONARY_FRAMES")? {
            self.tracking.stationary_frames = value;
        }
        if let Some(value) = env_parse::<f64>("LOSTFOUND_STATIONARY_THRESHOLD_PX")? {
            self.tracking.stationary_threshold_px = value;
        }
        if let Some(value) = env_parse::<f64>("LOSTFOUND_MIN_DETECTION_INTERVAL_S")? {
            self.tracking.min_detection_interval_s = value;
        }
        if let Some(value) = env_parse::<f64>("LOSTFOUND_MAX_TRACKING_DISTANCE_PX")? {
            self.tracking.max_tracking_distance_px = value;
        }
        if let Some(value) = env_parse::<bool>("LOSTFOUND_REQUIRE_STATIONARY")? {
            self.tracking.require_stationary = value;
        }
        if let Some(value) = env_parse::<u32>("LOSTFOUND_MIN_CROP_SIZE")? {
            self.crop.min_crop_size = value;
        }
        if let Ok(categories) = std::env::var("LOSTFOUND_PRIORITY_CATEGORIES") {
            let parsed = split_csv(&categories)
                .iter()
                .map(|name| parse_category(name))
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.selection.priority_categories = parsed;
            }
        }
        if let Ok(policy) = std::env::var("LOSTFOUND_UNKNOWN_LABEL_POLICY") {
            if !policy.trim().is_empty() {
                self.classifier.unknown_label_policy = UnknownLabelPolicy::parse(&policy)?;
            }
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        let classifier = &self.classifier;
        check_unit("confidence_threshold", classifier.confidence_threshold)?;
        for category in Category::LOST_ITEMS {
            let profile = classifier
                .profiles
                .get(&category)
                .ok_or_else(|| anyhow!("missing category profile for {}", category))?;
            check_unit(&format!("{} priority", category), profile.priority)?;
            check_unit(&format!("{} min_confidence", category), profile.min_confidence)?;
            if !(0.0..1.0).contains(&profile.min_size_ratio) {
                return Err(anyhow!(
                    "{} min_size_ratio must be in [0, 1), got {}",
                    category,
                    profile.min_size_ratio
                ));
            }
        }
        if let Some((label, _)) = classifier
            .labels
            .iter()
            .find(|(_, category)| **category == Category::Excluded)
        {
            return Err(anyhow!(
                "label {:?} maps to EXCLUDED; remove it from the table instead",
                label
            ));
        }
        if !classifier.confusable_category.is_lost_item() {
            return Err(anyhow!("confusable_category must be a lost-item category"));
        }
        check_unit(
            "confusable_min_confidence",
            classifier.confusable_min_confidence,
        )?;
        if let UnknownLabelPolicy::Include(category) = classifier.unknown_label_policy {
            if !category.is_lost_item() {
                return Err(anyhow!("unknown_label_policy must include a lost-item category"));
            }
        }
        if !(classifier.max_area_ratio > 0.0 && classifier.max_area_ratio <= 1.0) {
            return Err(anyhow!("classifier max_area_ratio must be in (0, 1]"));
        }
        if !(classifier.min_side_px >= 0.0) {
            return Err(anyhow!("min_side_px must be non-negative"));
        }

        let proximity = &self.proximity;
        check_unit("person_min_confidence", proximity.person_min_confidence)?;
        if !(proximity.scene_factor >= 0.0 && proximity.object_factor >= 0.0) {
            return Err(anyhow!("proximity factors must be non-negative"));
        }

        let tracking = &self.tracking;
        if !(tracking.stationary_threshold_px > 0.0) {
            return Err(anyhow!("stationary_threshold_px must be greater than zero"));
        }
        if tracking.stationary_frames == 0 {
            return Err(anyhow!("stationary_frames must be at least 1"));
        }
        if !(tracking.min_detection_interval_s >= 0.0) {
            return Err(anyhow!("min_detection_interval_s must be non-negative"));
        }
        if !(tracking.max_tracking_distance_px > 0.0) {
            return Err(anyhow!("max_tracking_distance_px must be greater than zero"));
        }
        if tracking.max_missed_updates == 0 {
            return Err(anyhow!("max_missed_updates must be at least 1"));
        }
        if tracking.category_window == 0 {
            return Err(anyhow!("category_window must be at least 1"));
        }
        if !(tracking.category_majority > 0.5 && tracking.category_majority <= 1.0) {
            return Err(anyhow!("category_majority must be in (0.5, 1]"));
        }
        if tracking.history_limit < 2 {
            return Err(anyhow!("history_limit must be at least 2"));
        }

        let scoring = &self.scoring;
        let weights = scoring.weights;
        for (name, value) in [
            ("confidence", weights.confidence),
            ("priority", weights.priority),
            ("size", weights.size),
            ("position", weights.position),
        ] {
            check_unit(&format!("{} weight", name), value)?;
        }
        if (weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(anyhow!(
                "score weights must sum to 1.0, got {:.6}",
                weights.sum()
            ));
        }
        if !(scoring.size_falloff_ratio > 0.0 && scoring.size_falloff_ratio <= 1.0) {
            return Err(anyhow!("size_falloff_ratio must be in (0, 1]"));
        }
        if !(scoring.optimal_area_ratio > 0.0
            && scoring.optimal_area_ratio < scoring.size_falloff_ratio)
        {
            return Err(anyhow!(
                "optimal_area_ratio must be in (0, size_falloff_ratio)"
            ));
        }
        check_unit("consistency_bonus", scoring.consistency_bonus)?;
        if scoring.consistency_window == 0
            || scoring.consistency_min_repeats == 0
            || scoring.consistency_min_repeats > scoring.consistency_window
        {
            return Err(anyhow!(
                "consistency_min_repeats must be in 1..=consistency_window"
            ));
        }

        let selection = &mut self.selection;
        if let Some(category) = selection
            .priority_categories
            .iter()
            .find(|category| !category.is_lost_item())
        {
            return Err(anyhow!(
                "priority category {} is not a lost-item category",
                category
            ));
        }
        let mut seen = BTreeSet::new();
        selection
            .priority_categories
            .retain(|category| seen.insert(*category));
        if selection.early_stop_after == Some(0) {
            return Err(anyhow!("early_stop_after must be at least 1 when set"));
        }
        check_unit("early_stop_confidence", selection.early_stop_confidence)?;

        let crop = &mut self.crop;
        if !(crop.base_padding > 0.0) {
            return Err(anyhow!("base_padding must be greater than zero"));
        }
        if crop.min_crop_size == 0 {
            return Err(anyhow!("min_crop_size must be greater than zero"));
        }
        if crop.jpeg_quality == 0 || crop.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        crop.tiers
            .sort_by(|a, b| a.max_area_ratio.total_cmp(&b.max_area_ratio));
        for pair in crop.tiers.windows(2) {
            if pair[0].max_area_ratio == pair[1].max_area_ratio {
                return Err(anyhow!(
                    "duplicate padding tier at area ratio {}",
                    pair[0].max_area_ratio
                ));
            }
        }
        for tier in &crop.tiers {
            if !(tier.max_area_ratio > 0.0 && tier.max_area_ratio <= 1.0) {
                return Err(anyhow!("padding tier area ratio must be in (0, 1]"));
            }
            if !(tier.factor >= crop.base_padding) {
                return Err(anyhow!(
                    "padding tier factor {} is below base_padding {}",
                    tier.factor,
                    crop.base_padding
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_category(name: &str) -> Result<Category> {
    Category::parse(name).ok_or_else(|| anyhow!("unknown category {:?}", name))
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be in [0, 1], got {}", name, value));
    }
    Ok(())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value {:?}", key, value)),
        _ => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
