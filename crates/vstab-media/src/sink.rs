//! Render sinks: where the cropped frame sequence goes.

use crate::crop::RenderedVideo;
use crate::error::{StabError, StabResult};
use crate::progress::ProgressReporter;
use crate::video::{SequenceManifest, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use vstab_models::Stage;

/// Persists a rendered frame sequence.
pub trait FrameSink {
    /// Write every frame. On failure nothing is left at the target.
    fn save(&mut self, video: &RenderedVideo, reporter: &ProgressReporter) -> StabResult<()>;
}

/// Keeps the rendered video in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    saved: Option<RenderedVideo>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(&self) -> Option<&RenderedVideo> {
        self.saved.as_ref()
    }

    pub fn into_video(self) -> Option<RenderedVideo> {
        self.saved
    }
}

impl FrameSink for MemorySink {
    fn save(&mut self, video: &RenderedVideo, reporter: &ProgressReporter) -> StabResult<()> {
        let total = video.len();
        for done in 1..=total {
            reporter.progress(Stage::Saving, done, total);
        }
        self.saved = Some(video.clone());
        Ok(())
    }
}

/// Writes PNG frames plus a manifest into a directory.
///
/// Frames are staged in a temporary directory next to the target and moved
/// into place with a single rename once everything is written.
#[derive(Debug, Clone)]
pub struct ImageSequenceSink {
    target: PathBuf,
    overwrite: bool,
}

impl ImageSequenceSink {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            overwrite: false,
        }
    }

    /// Replace an existing target directory.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// File name of frame `index`.
    pub fn frame_name(index: usize) -> String {
        format!("frame_{index:06}.png")
    }

    fn unavailable(&self, reason: impl Into<String>) -> StabError {
        StabError::output_unavailable(&self.target, reason)
    }
}

impl FrameSink for ImageSequenceSink {
    fn save(&mut self, video: &RenderedVideo, reporter: &ProgressReporter) -> StabResult<()> {
        let start = Instant::now();
        let parent = match self.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(self.unavailable(format!("parent directory {} does not exist", parent.display())));
        }
        if self.target.exists() && !self.overwrite {
            return Err(self.unavailable("target already exists"));
        }
        let Some(size) = video.frame_size() else {
            return Err(self.unavailable("no frames to write"));
        };

        let staging = tempfile::Builder::new()
            .prefix(".vstab-")
            .tempdir_in(&parent)
            .map_err(|e| self.unavailable(format!("cannot create staging directory: {e}")))?;

        let total = video.len();
        let mut names = Vec::with_capacity(total);
        for (index, frame) in video.frames.iter().enumerate() {
            reporter.check_cancelled(Stage::Saving)?;
            let name = Self::frame_name(index);
            frame
                .save(staging.path().join(&name))
                .map_err(|e| self.unavailable(format!("cannot write {name}: {e}")))?;
            names.push(name);
            reporter.progress(Stage::Saving, index + 1, total);
        }

        let manifest = SequenceManifest {
            fps: video.fps,
            frame_count: total,
            width: size.width,
            height: size.height,
            frames: names,
        };
        std::fs::write(staging.path().join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)
            .map_err(|e| self.unavailable(format!("cannot write manifest: {e}")))?;

        if self.target.exists() {
            std::fs::remove_dir_all(&self.target)
                .map_err(|e| self.unavailable(format!("cannot replace existing target: {e}")))?;
        }
        // the staging guard's cleanup is a no-op once the directory has moved
        std::fs::rename(staging.path(), &self.target)
            .map_err(|e| self.unavailable(format!("cannot move frames into place: {e}")))?;

        info!(
            "[SAVING] Wrote {} frames to {} in {:.2}s",
            total,
            self.target.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FrameSource, ImageSequenceSource};
    use image::{Rgb, RgbImage};

    fn rendered(count: usize) -> RenderedVideo {
        RenderedVideo {
            frames: (0..count)
                .map(|i| RgbImage::from_pixel(6, 4, Rgb([i as u8 * 10, 0, 0])))
                .collect(),
            fps: 24.0,
        }
    }

    #[test]
    fn test_image_sequence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut sink = ImageSequenceSink::new(&target);
        sink.save(&rendered(3), &ProgressReporter::silent()).unwrap();

        let manifest: SequenceManifest =
            serde_json::from_str(&std::fs::read_to_string(target.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.frame_count, 3);
        assert_eq!(manifest.frames[2], "frame_000002.png");

        let mut source = ImageSequenceSource::open(&target, None).unwrap();
        assert_eq!(source.fps(), 24.0);
        let second = {
            source.next_frame().unwrap();
            source.next_frame().unwrap().unwrap()
        };
        assert_eq!(second.get_pixel(0, 0), &Rgb([10, 0, 0]));

        // no staging directories left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".vstab-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_existing_target_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep.txt"), "x").unwrap();

        let err = ImageSequenceSink::new(&target)
            .save(&rendered(1), &ProgressReporter::silent())
            .unwrap_err();
        assert!(matches!(err, StabError::OutputUnavailable { .. }));
        assert!(target.join("keep.txt").exists());

        ImageSequenceSink::new(&target)
            .with_overwrite(true)
            .save(&rendered(1), &ProgressReporter::silent())
            .unwrap();
        assert!(!target.join("keep.txt").exists());
        assert!(target.join("frame_000000.png").exists());
    }

    #[test]
    fn test_missing_parent_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("out");
        let err = ImageSequenceSink::new(&target)
            .save(&rendered(1), &ProgressReporter::silent())
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Saving));
        assert!(!target.exists());
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.save(&rendered(2), &ProgressReporter::silent()).unwrap();
        assert_eq!(sink.video().map(RenderedVideo::len), Some(2));
    }
}
