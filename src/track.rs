//! Per-session multi-object tracking and stationarity.
//!
//! A `TrackManager` is owned by exactly one session. Tracks move through
//! `New → Active ⇄ Stationary → Expired`; expired tracks are dropped from the
//! manager in the same update that expires them.

use std::collections::VecDeque;

use crate::config::TrackingSettings;
use crate::{centroid_distance, Category, ClassifiedDetection};

/// Slack for comparing frame timestamps that went through float arithmetic.
const TIME_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    New,
    Active,
    Stationary,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CentroidSample {
    pub x: f64,
    pub y: f64,
    pub timestamp: f64,
}

#[derive(Clone, Debug)]
pub struct Track {
    pub track_id: u64,
    /// Oldest first, bounded by `history_limit`.
    pub centroid_history: VecDeque<CentroidSample>,
    pub stationary_frame_count: u32,
    pub last_seen_timestamp: f64,
    pub category: Category,
    pub state: TrackState,
    missed_updates: u32,
    recent_categories: VecDeque<Category>,
}

impl Track {
    fn new(track_id: u64, centroid: (f64, f64), timestamp: f64, category: Category) -> Self {
        let mut centroid_history = VecDeque::new();
        centroid_history.push_back(CentroidSample {
            x: centroid.0,
            y: centroid.1,
            timestamp,
        });
        let mut recent_categories = VecDeque::new();
        recent_categories.push_back(category);
        Self {
            track_id,
            centroid_history,
            stationary_frame_count: 0,
            last_seen_timestamp: timestamp,
            category,
            state: TrackState::New,
            missed_updates: 0,
            recent_categories,
        }
    }

    pub fn last_centroid(&self) -> (f64, f64) {
        self.centroid_history
            .back()
            .map(|sample| (sample.x, sample.y))
            .unwrap_or((0.0, 0.0))
    }

    pub fn is_stationary(&self) -> bool {
        self.state == TrackState::Stationary
    }

    pub fn missed_updates(&self) -> u32 {
        self.missed_updates
    }

    /// How many of the last `window` observations carried `category`.
    pub fn category_recurrence(&self, category: Category, window: usize) -> usize {
        self.recent_categories
            .iter()
            .rev()
            .take(window)
            .filter(|observed| **observed == category)
            .count()
    }
}

/// Result of associating one detection with a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackAssignment {
    pub detection_index: usize,
    pub track_id: u64,
    pub created: bool,
}

pub struct TrackManager {
    settings: TrackingSettings,
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackManager {
    pub fn new(settings: TrackingSettings) -> Self {
        Self {
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Associate this frame's detections with tracks and advance every track's state.
    ///
    /// Returns the tracks touched by `detections`, in detection order.
    pub fn update(&mut self, detections: &[ClassifiedDetection], timestamp: f64) -> Vec<&Track> {
        let assignments = self.associate(detections, timestamp);
        assignments
            .iter()
            .filter_map(|assignment| self.track(assignment.track_id))
            .collect()
    }

    /// Same as [`TrackManager::update`] but returns bare assignments.
    pub fn associate(
        &mut self,
        detections: &[ClassifiedDetection],
        timestamp: f64,
    ) -> Vec<TrackAssignment> {
        let max_distance = self.settings.max_tracking_distance_px;
        let min_interval = self.settings.min_detection_interval_s;

        let centroids: Vec<(f64, f64)> = detections.iter().map(|det| det.bbox().center()).collect();
        let eligible: Vec<bool> = self
            .tracks
            .iter()
            .map(|track| timestamp - track.last_seen_timestamp + TIME_EPSILON >= min_interval)
            .collect();

        // (distance, track index, detection index), nearest first.
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (track_idx, track) in self.tracks.iter().enumerate() {
            if !eligible[track_idx] {
                continue;
            }
            let last = track.last_centroid();
            for (det_idx, centroid) in centroids.iter().enumerate() {
                let distance = centroid_distance(last, *centroid);
                if distance <= max_distance {
                    pairs.push((distance, track_idx, det_idx));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| self.tracks[a.1].track_id.cmp(&self.tracks[b.1].track_id))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut track_claimed = vec![false; self.tracks.len()];
        let mut matched: Vec<Option<usize>> = vec![None; detections.len()];
        for (_, track_idx, det_idx) in pairs {
            if track_claimed[track_idx] || matched[det_idx].is_some() {
                continue;
            }
            track_claimed[track_idx] = true;
            matched[det_idx] = Some(track_idx);
        }

        let mut assignments = Vec::with_capacity(detections.len());
        for (det_idx, detection) in detections.iter().enumerate() {
            let centroid = centroids[det_idx];
            match matched[det_idx] {
                Some(track_idx) => {
                    let track_id = self.apply_match(track_idx, detection, centroid, timestamp);
                    assignments.push(TrackAssignment {
                        detection_index: det_idx,
                        track_id,
                        created: false,
                    });
                }
                None => {
                    let track_id = self.next_id;
                    self.next_id += 1;
                    log::debug!(
                        "track {} created for {} at ({:.0}, {:.0})",
                        track_id,
                        detection.category,
                        centroid.0,
                        centroid.1
                    );
                    self.tracks
                        .push(Track::new(track_id, centroid, timestamp, detection.category));
                    assignments.push(TrackAssignment {
                        detection_index: det_idx,
                        track_id,
                        created: true,
                    });
                }
            }
        }

        self.expire_missing(&track_claimed, &eligible);
        assignments
    }

    fn apply_match(
        &mut self,
        track_idx: usize,
        detection: &ClassifiedDetection,
        centroid: (f64, f64),
        timestamp: f64,
    ) -> u64 {
        let settings = &self.settings;
        let track = &mut self.tracks[track_idx];
        let movement = centroid_distance(track.last_centroid(), centroid);

        if movement < settings.stationary_threshold_px {
            track.stationary_frame_count = track.stationary_frame_count.saturating_add(1);
        } else {
            if track.stationary_frame_count > 0 {
                log::debug!(
                    "track {} moved {:.1}px; stationary count reset",
                    track.track_id,
                    movement
                );
            }
            track.stationary_frame_count = 0;
        }

        let next_state = if track.stationary_frame_count >= settings.stationary_frames {
            TrackState::Stationary
        } else {
            TrackState::Active
        };
        if next_state != track.state {
            log::debug!(
                "track {} {:?} -> {:?}",
                track.track_id,
                track.state,
                next_state
            );
        }
        track.state = next_state;

        track.centroid_history.push_back(CentroidSample {
            x: centroid.0,
            y: centroid.1,
            timestamp,
        });
        while track.centroid_history.len() > settings.history_limit {
            track.centroid_history.pop_front();
        }
        track.last_seen_timestamp = timestamp;
        track.missed_updates = 0;

        track.recent_categories.push_back(detection.category);
        while track.recent_categories.len() > settings.category_window {
            track.recent_categories.pop_front();
        }
        revise_category(track, settings);

        track.track_id
    }

    /// Eligible tracks that went unmatched count a miss; too-recent tracks do not.
    fn expire_missing(&mut self, claimed: &[bool], eligible: &[bool]) {
        let max_missed = self.settings.max_missed_updates;
        for (idx, track) in self.tracks.iter_mut().enumerate().take(claimed.len()) {
            if claimed[idx] || !eligible[idx] {
                continue;
            }
            track.missed_updates += 1;
            if track.missed_updates >= max_missed {
                log::debug!(
                    "track {} expired after {} missed updates",
                    track.track_id,
                    track.missed_updates
                );
                track.state = TrackState::Expired;
            }
        }
        self.tracks.retain(|track| track.state != TrackState::Expired);
    }

    pub fn track(&self, track_id: u64) -> Option<&Track> {
        self.tracks
            .binary_search_by_key(&track_id, |track| track.track_id)
            .ok()
            .map(|idx| &self.tracks[idx])
    }

    pub fn stationary(&self, track_id: u64) -> bool {
        self.track(track_id).is_some_and(Track::is_stationary)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Switch the sticky category only on a strong majority over a full window.
fn revise_category(track: &mut Track, settings: &TrackingSettings) {
    if track.recent_categories.len() < settings.category_window {
        return;
    }
    let total = track.recent_categories.len() as f64;
    for candidate in Category::LOST_ITEMS {
        if candidate == track.category {
            continue;
        }
        let count = track
            .recent_categories
            .iter()
            .filter(|category| **category == candidate)
            .count() as f64;
        if count / total >= settings.category_majority {
            log::info!(
                "track {} category revised {} -> {}",
                track.track_id,
                track.category,
                candidate
            );
            track.category = candidate;
            return;
        }
    }
}
