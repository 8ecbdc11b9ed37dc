use anyhow::Result;

use super::{SampledFrame, SourceFrame};
use crate::error::EngineError;

/// Upper bound on the number of source frames between evaluations.
const MAX_SAMPLE_INTERVAL: u64 = 10;

/// Picks every `interval`-th source frame, with
/// `interval = max(1, min(10, fps / 2))`: roughly two evaluations per second.
#[derive(Clone, Copy, Debug)]
pub struct FrameSampler {
    fps: f64,
    interval: u64,
}

impl FrameSampler {
    pub fn new(fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(EngineError::input(format!("invalid frame rate {}", fps)).into());
        }
        Ok(Self {
            fps,
            interval: Self::interval_for_fps(fps),
        })
    }

    /// Evaluates every frame; `fps` only drives the timestamps.
    pub fn every_frame(fps: f64) -> Result<Self> {
        let mut sampler = Self::new(fps)?;
        sampler.interval = 1;
        Ok(sampler)
    }

    pub fn interval_for_fps(fps: f64) -> u64 {
        let half = (fps / 2.0).floor();
        if !(half >= 1.0) {
            return 1;
        }
        (half as u64).min(MAX_SAMPLE_INTERVAL)
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn is_sampled(&self, index: u64) -> bool {
        index % self.interval == 0
    }

    pub fn timestamp(&self, index: u64) -> f64 {
        index as f64 / self.fps
    }

    pub fn sample(&self, frame: SourceFrame) -> SampledFrame {
        SampledFrame {
            frame_number: frame.index,
            timestamp_s: self.timestamp(frame.index),
            image: frame.image,
        }
    }
}
