//! Per-session selection pipeline.
//!
//! An [`Engine`] holds the immutable, configured components and can be shared
//! by any number of sessions. A [`Session`] owns the mutable state of one video
//! or image batch (its `TrackManager` and candidate pool) and is consumed by
//! [`Session::finish`].
//!
//! Frames must be fed in temporal order. Each frame is fully classified,
//! filtered, tracked and scored before the next one is looked at.

use anyhow::Result;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::classify::CategoryClassifier;
use crate::config::EngineConfig;
use crate::crop::ContextCropper;
use crate::detect::DetectorBackend;
use crate::error::{error_kind, EngineError, ErrorKind};
use crate::ingest::{FrameSampler, FrameSource, SampledFrame};
use crate::proximity::ProximityFilter;
use crate::score::CandidateScorer;
use crate::select::{BestCandidateSelector, Candidate, CandidatePool, SelectionResult};
use crate::track::TrackManager;
use crate::{Category, ClassifiedDetection, FrameDims, RawDetection};

pub struct Engine {
    config: EngineConfig,
    classifier: CategoryClassifier,
    proximity: ProximityFilter,
    scorer: CandidateScorer,
    selector: BestCandidateSelector,
    cropper: ContextCropper,
}

impl Engine {
    pub fn new(mut config: EngineConfig) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "engine configured: priority {:?}, stationary {} frames / {}px, min crop {}px",
            config.selection.priority_categories,
            config.tracking.stationary_frames,
            config.tracking.stationary_threshold_px,
            config.crop.min_crop_size
        );
        Ok(Self {
            classifier: CategoryClassifier::new(&config.classifier),
            proximity: ProximityFilter::new(&config.proximity),
            scorer: CandidateScorer::new(config.scoring.clone()),
            selector: BestCandidateSelector::new(config.selection.priority_categories.clone()),
            cropper: ContextCropper::new(&config.crop),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &CategoryClassifier {
        &self.classifier
    }

    pub fn proximity(&self) -> &ProximityFilter {
        &self.proximity
    }

    pub fn scorer(&self) -> &CandidateScorer {
        &self.scorer
    }

    pub fn selector(&self) -> &BestCandidateSelector {
        &self.selector
    }

    pub fn cropper(&self) -> &ContextCropper {
        &self.cropper
    }

    /// Start a new session with fresh tracking state.
    pub fn session(&self) -> Session<'_> {
        Session {
            engine: self,
            tracks: TrackManager::new(self.config.tracking.clone()),
            pool: CandidatePool::new(),
            stats: SessionStats::default(),
            winner_frame: None,
        }
    }

    pub fn run<S, D>(&self, source: &mut S, detector: &mut D, stop: &AtomicBool) -> Result<SelectionResult>
    where
        S: FrameSource + ?Sized,
        D: DetectorBackend + ?Sized,
    {
        self.run_with_progress(source, detector, stop, |_| {}).map(|(result, _)| result)
    }

    /// Drive one session over `source` until it ends, `stop` is raised, or the
    /// early-stop condition is met.
    ///
    /// `on_frame` is called after every evaluated frame.
    pub fn run_with_progress<S, D, F>(
        &self,
        source: &mut S,
        detector: &mut D,
        stop: &AtomicBool,
        mut on_frame: F,
    ) -> Result<(SelectionResult, SessionStats)>
    where
        S: FrameSource + ?Sized,
        D: DetectorBackend + ?Sized,
        F: FnMut(&SessionStats),
    {
        source.connect().map_err(as_input_error)?;
        detector.warm_up().map_err(|err| {
            if error_kind(&err).is_some() {
                err
            } else {
                EngineError::detector_unavailable(format!("{}: {:#}", detector.name(), err)).into()
            }
        })?;
        let sampler = if source.is_batch() {
            FrameSampler::every_frame(source.fps())?
        } else {
            FrameSampler::new(source.fps())?
        };
        log::info!(
            "session started: {} fps, evaluating every {} frame(s) with detector {}",
            sampler.fps(),
            sampler.interval(),
            detector.name()
        );

        let mut session = self.session();
        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested; finishing with committed state");
                session.stats.cancelled = true;
                break;
            }
            let next = source.next_frame();
            let frame = match next {
                Ok(Some(frame)) => Some(frame),
                Ok(None) => break,
                Err(err) if error_kind(&err) == Some(ErrorKind::FrameProcessing) => {
                    log::warn!("{}; frame skipped", err);
                    session.stats.frames_read += 1;
                    session.stats.frames_skipped += 1;
                    if !source.is_healthy() {
                        return Err(EngineError::input(
                            "frame source became unhealthy after repeated decode failures",
                        )
                        .into());
                    }
                    None
                }
                Err(err) => return Err(as_input_error(err)),
            };

            if let Some(frame) = frame {
                session.stats.frames_read += 1;
                if !sampler.is_sampled(frame.index) {
                    continue;
                }
                session.process_frame(sampler.sample(frame), &mut *detector)?;
                on_frame(&session.stats);
                if session.early_stop_reached() {
                    log::info!(
                        "early stop after {} confident priority candidates",
                        session.stats.candidates
                    );
                    session.stats.stopped_early = true;
                    break;
                }
            }

            let skipped = source.skip_frames(sampler.interval().saturating_sub(1))?;
            session.stats.frames_read += skipped;
        }

        if session.stats.frames_read == 0 {
            return Err(EngineError::input("frame source produced no frames").into());
        }
        let stats = session.stats.clone();
        Ok((session.finish(), stats))
    }
}

fn as_input_error(err: anyhow::Error) -> anyhow::Error {
    if error_kind(&err).is_some() {
        err
    } else {
        EngineError::input(format!("{:#}", err)).into()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStats {
    /// Source frames consumed, sampled or not.
    pub frames_read: u64,
    pub frames_sampled: u64,
    pub frames_processed: u64,
    /// Frames dropped by decode or detector failures.
    pub frames_skipped: u64,
    pub detections: u64,
    pub candidates: u64,
    pub stopped_early: bool,
    pub cancelled: bool,
}

/// What happened to one frame's detections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub detections: usize,
    pub persons: usize,
    pub excluded: usize,
    pub attended: usize,
    pub not_stationary: usize,
    pub candidates: usize,
    pub skipped: bool,
}

pub struct Session<'a> {
    engine: &'a Engine,
    tracks: TrackManager,
    pool: CandidatePool,
    stats: SessionStats,
    /// Raster of the frame holding the current best candidate.
    winner_frame: Option<(u64, RgbImage)>,
}

impl<'a> Session<'a> {
    /// Run the detector on one sampled frame and feed the result through the pipeline.
    ///
    /// Detector failures skip the frame, except `DETECTOR_UNAVAILABLE` which ends the run.
    pub fn process_frame<D>(&mut self, frame: SampledFrame, detector: &mut D) -> Result<FrameOutcome>
    where
        D: DetectorBackend + ?Sized,
    {
        self.stats.frames_sampled += 1;
        if frame.dims().is_empty() {
            log::warn!("frame {} has no pixels; skipped", frame.frame_number);
            self.stats.frames_skipped += 1;
            return Ok(FrameOutcome {
                skipped: true,
                ..FrameOutcome::default()
            });
        }
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) if error_kind(&err) == Some(ErrorKind::DetectorUnavailable) => return Err(err),
            Err(err) => {
                let err = EngineError::frame_processing(format!(
                    "frame {}: {:#}",
                    frame.frame_number, err
                ));
                log::warn!("{}; frame skipped", err);
                self.stats.frames_skipped += 1;
                return Ok(FrameOutcome {
                    skipped: true,
                    ..FrameOutcome::default()
                });
            }
        };
        Ok(self.observe(&frame, detections))
    }

    /// Feed one frame's detections through classify → proximity → track → score → pool.
    pub fn observe(&mut self, frame: &SampledFrame, detections: Vec<RawDetection>) -> FrameOutcome {
        let engine = self.engine;
        let dims: FrameDims = frame.dims();
        let mut outcome = FrameOutcome {
            detections: detections.len(),
            ..FrameOutcome::default()
        };

        let mut persons = Vec::new();
        let mut items = Vec::new();
        for detection in detections {
            let classified = engine.classifier.classify_detection(detection, dims);
            match classified.category {
                Category::Person => persons.push(classified.detection),
                Category::Excluded => outcome.excluded += 1,
                _ => items.push(classified),
            }
        }
        outcome.persons = persons.len();

        let attended: Vec<bool> = items
            .iter()
            .map(|item| engine.proximity.is_attended(item.bbox(), &persons, dims))
            .collect();
        let assignments = self.tracks.associate(&items, frame.timestamp_s);

        let require_stationary = engine.config.tracking.require_stationary;
        let window = engine.scorer.consistency_window();
        for (assignment, item) in assignments.iter().zip(items) {
            let Some(track) = self.tracks.track(assignment.track_id) else {
                continue;
            };
            if require_stationary && !track.is_stationary() {
                outcome.not_stationary += 1;
                continue;
            }
            let is_attended = attended[assignment.detection_index];
            if is_attended {
                outcome.attended += 1;
            }
            let category = track.category;
            let mut candidate = Candidate {
                detection: ClassifiedDetection {
                    detection: item.detection,
                    category,
                    category_priority: engine.classifier.priority(category),
                },
                track_id: track.track_id,
                frame_number: frame.frame_number,
                timestamp_s: frame.timestamp_s,
                attended: is_attended,
                score: 0.0,
                category_recurrence: track.category_recurrence(category, window),
            };
            candidate.score = engine.scorer.score(&candidate, dims);
            log::debug!(
                "frame {} track {} {} conf {:.2} score {:.3}{}",
                frame.frame_number,
                candidate.track_id,
                category,
                candidate.confidence(),
                candidate.score,
                if is_attended { " (attended)" } else { "" }
            );
            if self.pool.push(candidate) {
                outcome.candidates += 1;
            }
        }

        if outcome.candidates > 0 {
            let best_here = engine
                .selector
                .best(&self.pool)
                .is_some_and(|best| best.frame_number == frame.frame_number);
            if best_here {
                self.winner_frame = Some((frame.frame_number, frame.image.clone()));
            }
        }

        self.stats.frames_processed += 1;
        self.stats.detections += outcome.detections as u64;
        self.stats.candidates += outcome.candidates as u64;
        outcome
    }

    pub fn early_stop_reached(&self) -> bool {
        let selection = &self.engine.config.selection;
        let Some(limit) = selection.early_stop_after else {
            return false;
        };
        let confident = self
            .pool
            .candidates()
            .iter()
            .filter(|candidate| {
                self.engine.selector.is_priority(candidate.category())
                    && candidate.confidence() > selection.early_stop_confidence
            })
            .count();
        confident >= limit
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn tracks(&self) -> &TrackManager {
        &self.tracks
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Select the winner and crop it out of its frame.
    pub fn finish(self) -> SelectionResult {
        let engine = self.engine;
        let mut result = engine.selector.select(&self.pool);
        let Some(winner) = result.winner.as_ref() else {
            log::info!(
                "no object found ({} frames evaluated, {} candidates rejected)",
                self.stats.frames_processed,
                self.pool.rejected()
            );
            return result;
        };

        match &self.winner_frame {
            Some((frame_number, image)) if *frame_number == winner.frame_number => {
                let dims = FrameDims::new(image.width(), image.height());
                let (rect, fallback) = engine.cropper.crop_region_or_center(winner.bbox(), dims);
                result.crop_image = Some(engine.cropper.extract(image, rect));
                result.crop_region = Some(rect);
                result.crop_fallback = fallback;
            }
            _ => log::warn!(
                "frame {} of the winning candidate was not retained; no crop",
                winner.frame_number
            ),
        }

        log::info!(
            "selected {} (track {}) at frame {} with score {:.3} from {} candidates",
            winner.category(),
            winner.track_id,
            winner.frame_number,
            winner.score,
            self.pool.len()
        );
        result
    }
}
