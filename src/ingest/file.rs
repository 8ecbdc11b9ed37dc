//! Local file frame source.
//!
//! `FileSource` reads frames from local storage only:
//! - a directory of JPEG/PNG frames, taken in file-name order
//! - a single image file (a batch of one)
//! - either of the above behind a `dir:` prefix
//! - `stub://<name>` synthetic frames for tests
//!
//! The file source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceFrame};
use crate::error::EngineError;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
/// Consecutive undecodable frames before the source reports itself unhealthy.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Directory, image file, or `stub://<name>`.
    pub path: String,
    /// Nominal frame rate of the sequence.
    pub fps: f64,
    /// Synthetic frame size (stub only).
    pub width: u32,
    pub height: u32,
    /// Synthetic frame count (stub only).
    pub frames: u64,
    /// Treat the frames as an image batch: evaluate every one.
    pub batch: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            fps: 10.0,
            width: 640,
            height: 480,
            frames: 100,
            batch: false,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Directory(DirectorySource),
}

impl FileSource {
    pub fn new(mut config: FileConfig) -> Result<Self> {
        if let Some(path) = config.path.strip_prefix("dir:") {
            config.path = path.to_string();
        }
        if !is_local_file_path(&config.path) {
            return Err(EngineError::input(
                "file ingestion only supports local paths (no URL schemes)",
            )
            .into());
        }
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(EngineError::input(format!("invalid frame rate {}", config.fps)).into());
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            })
        } else {
            Ok(Self {
                backend: FileBackend::Directory(DirectorySource::new(config)),
            })
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            FileBackend::Directory(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            FileBackend::Directory(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Directory(source) => source.next_frame(),
        }
    }

    fn skip_frames(&mut self, count: u64) -> Result<u64> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.skip(count)),
            FileBackend::Directory(source) => Ok(source.skip(count)),
        }
    }

    fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.config.fps,
            FileBackend::Directory(source) => source.config.fps,
        }
    }

    fn is_batch(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.config.batch,
            FileBackend::Directory(source) => source.config.batch,
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.is_healthy(),
            FileBackend::Directory(source) => source.is_healthy(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub frames_failed: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Directory / single image
// ----------------------------------------------------------------------------

struct DirectorySource {
    config: FileConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frames_captured: u64,
    frames_failed: u64,
    consecutive_failures: u32,
}

impl DirectorySource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frames_captured: 0,
            frames_failed: 0,
            consecutive_failures: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        let path = Path::new(&self.config.path);
        let files = if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| {
                EngineError::input(format!("cannot read frame directory {}: {}", path.display(), e))
            })?;
            let mut files = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| anyhow!("failed to list {}: {}", path.display(), e))?;
                let candidate = entry.path();
                if candidate.is_file() && has_frame_extension(&candidate) {
                    files.push(candidate);
                }
            }
            files.sort();
            files
        } else if path.is_file() && has_frame_extension(path) {
            vec![path.to_path_buf()]
        } else {
            return Err(EngineError::input(format!(
                "{} is neither a frame directory nor an image file",
                path.display()
            ))
            .into());
        };
        if files.is_empty() {
            return Err(EngineError::input(format!(
                "no JPEG/PNG frames found in {}",
                path.display()
            ))
            .into());
        }
        log::info!(
            "FileSource: connected to {} ({} frames)",
            self.config.path,
            files.len()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        match image::open(&path) {
            Ok(decoded) => {
                self.frames_captured += 1;
                self.consecutive_failures = 0;
                Ok(Some(SourceFrame {
                    index,
                    image: decoded.to_rgb8(),
                }))
            }
            Err(e) => {
                self.frames_failed += 1;
                self.consecutive_failures += 1;
                Err(EngineError::frame_processing(format!(
                    "failed to decode {}: {}",
                    path.display(),
                    e
                ))
                .into())
            }
        }
    }

    fn skip(&mut self, count: u64) -> u64 {
        let remaining = (self.files.len() - self.cursor.min(self.files.len())) as u64;
        let skipped = count.min(remaining);
        self.cursor += skipped as usize;
        skipped
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.consecutive_failures < MAX_CONSECUTIVE_FAILURES
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frames_captured,
            frames_failed: self.frames_failed,
            path: self.config.path.clone(),
        }
    }
}

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            FRAME_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 || self.config.frames == 0 {
            return Err(EngineError::input(format!(
                "synthetic source {} is empty",
                self.config.path
            ))
            .into());
        }
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        if self.frame_count >= self.config.frames {
            return Ok(None);
        }
        let index = self.frame_count;
        self.frame_count += 1;
        Ok(Some(SourceFrame {
            index,
            image: self.generate_synthetic_frame(index),
        }))
    }

    fn generate_synthetic_frame(&self, index: u64) -> RgbImage {
        let shade = (index % 64) as u8;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let base = ((x + y) % 128) as u8;
            Rgb([base.wrapping_add(shade), base, 96])
        })
    }

    fn skip(&mut self, count: u64) -> u64 {
        let skipped = count.min(self.config.frames - self.frame_count.min(self.config.frames));
        self.frame_count += skipped;
        skipped
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            frames_failed: 0,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    #[test]
    fn rejects_urls_and_empty_paths() {
        for path in ["", "rtsp://camera/1", "http://example.com/frames"] {
            let err = FileSource::new(FileConfig {
                path: path.to_string(),
                ..FileConfig::default()
            })
            .err()
            .expect("must reject");
            assert_eq!(error_kind(&err), Some(ErrorKind::Input));
        }
    }

    #[test]
    fn synthetic_source_yields_configured_frames() {
        let mut source = FileSource::new(FileConfig {
            path: "stub://lobby".to_string(),
            frames: 7,
            width: 32,
            height: 24,
            ..FileConfig::default()
        })
        .unwrap();
        source.connect().unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.image.dimensions(), (32, 24));
        assert_eq!(source.skip_frames(4).unwrap(), 4);
        assert_eq!(source.next_frame().unwrap().unwrap().index, 5);
        assert_eq!(source.skip_frames(10).unwrap(), 1);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_captured, 7);
    }

    #[test]
    fn directory_source_reads_sorted_frames_and_skips_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(16, 12)
            .save(dir.path().join("frame_000.png"))
            .unwrap();
        std::fs::write(dir.path().join("frame_001.jpg"), b"not an image").unwrap();
        RgbImage::new(16, 12)
            .save(dir.path().join("frame_002.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = FileSource::new(FileConfig {
            path: format!("dir:{}", dir.path().display()),
            ..FileConfig::default()
        })
        .unwrap();
        source.connect().unwrap();

        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);
        let err = source.next_frame().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::FrameProcessing));
        assert!(source.is_healthy());
        let last = source.next_frame().unwrap().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(last.image.dimensions(), (16, 12));
        assert!(source.next_frame().unwrap().is_none());

        let stats = source.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.frames_failed, 1);
    }

    #[test]
    fn empty_directory_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileSource::new(FileConfig {
            path: dir.path().display().to_string(),
            ..FileConfig::default()
        })
        .unwrap();
        let err = source.connect().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Input));
    }
}
