//! Engine error taxonomy.
//!
//! All fallible APIs return `anyhow::Result`. Errors that callers need to branch on
//! carry an [`EngineError`] so they can be recovered with `downcast_ref`.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreadable or empty frame source. Fatal for that input only.
    Input,
    /// The detector collaborator cannot be reached or initialized. Fatal for the run.
    DetectorUnavailable,
    /// One sampled frame failed. The frame is skipped.
    FrameProcessing,
    /// The winning box could not be cropped. A center crop is used instead.
    CropExtraction,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Input => "INPUT_ERROR",
            ErrorKind::DetectorUnavailable => "DETECTOR_UNAVAILABLE",
            ErrorKind::FrameProcessing => "FRAME_PROCESSING_ERROR",
            ErrorKind::CropExtraction => "CROP_EXTRACTION_ERROR",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn detector_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DetectorUnavailable, message)
    }

    pub fn frame_processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FrameProcessing, message)
    }

    pub fn crop_extraction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CropExtraction, message)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for EngineError {}

/// Kind of the engine error at the root of `err`, if there is one.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(|engine_err| engine_err.kind)
}
