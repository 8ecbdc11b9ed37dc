mod backend;
pub mod backends;
pub mod fusion;
pub mod payload;
mod registry;
pub mod timed;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::{ReplayBackend, StubBackend, StubScene};
pub use fusion::{fuse_detections, EnsembleDetector};
pub use payload::{parse_detections, DetectionRecord};
pub use registry::{BackendRegistry, SharedDetector};
pub use timed::TimedDetector;
