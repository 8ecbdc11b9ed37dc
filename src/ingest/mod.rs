//! Frame ingestion sources.
//!
//! The engine never decodes media containers itself. Sources hand over decoded
//! RGB frames with a running index; the [`FrameSampler`] decides which of them
//! the engine evaluates and stamps them with a source-relative timestamp.
//!
//! Provided sources:
//! - a directory of still frames (JPEG/PNG), e.g. an exported video or an image batch
//! - a single image file
//! - a synthetic `stub://` source for tests and demos

use anyhow::Result;
use image::RgbImage;

use crate::FrameDims;

pub mod file;
mod sampler;

pub use file::{FileConfig, FileSource, FileStats};
pub use sampler::FrameSampler;

/// A decoded frame straight from a source.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub index: u64,
    pub image: RgbImage,
}

/// A frame selected for evaluation.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub frame_number: u64,
    pub timestamp_s: f64,
    pub image: RgbImage,
}

impl SampledFrame {
    pub fn dims(&self) -> FrameDims {
        let (width, height) = self.image.dimensions();
        FrameDims::new(width, height)
    }
}

pub trait FrameSource {
    /// Open the source. Fails with `INPUT_ERROR` when it is unreadable or empty.
    fn connect(&mut self) -> Result<()>;

    /// Next decoded frame, `Ok(None)` at end of stream.
    ///
    /// A `FRAME_PROCESSING_ERROR` means only that frame was bad; the source has
    /// advanced and the caller may keep reading.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;

    /// Advance past up to `count` frames without decoding them where possible.
    /// Returns how many were skipped.
    fn skip_frames(&mut self, count: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < count {
            match self.next_frame() {
                Ok(Some(_)) => skipped += 1,
                Ok(None) => break,
                Err(err) => {
                    if crate::error::error_kind(&err)
                        == Some(crate::error::ErrorKind::FrameProcessing)
                    {
                        skipped += 1;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(skipped)
    }

    /// Nominal frames per second.
    fn fps(&self) -> f64;

    /// Image batches evaluate every frame instead of sampling by frame rate.
    fn is_batch(&self) -> bool {
        false
    }

    fn is_healthy(&self) -> bool;
}
