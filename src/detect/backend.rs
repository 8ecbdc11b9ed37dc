use anyhow::Result;

use crate::ingest::SampledFrame;
use crate::RawDetection;

/// Detection capabilities a backend can offer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Localized, labelled objects (bags, phones, ...).
    ObjectDetection,
    /// Person boxes, needed for attendance checks.
    PersonDetection,
}

/// Detector collaborator.
///
/// The engine treats `detect` as a blocking, side-effect-free request/response
/// call. Implementations must not retain the frame beyond the call and must
/// return detections in source-frame pixel coordinates.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on one sampled frame.
    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook. A failure here means the detector is unavailable.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        (**self).supports(capability)
    }

    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
