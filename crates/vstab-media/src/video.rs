//! Frame store: the loaded video and its per-frame derived state.
//!
//! Stages never mutate frames directly. Each stage reads an immutable
//! [`Video`] and returns per-frame outputs, which the pipeline then writes
//! back through the `set_*` methods. Every field is written by exactly one
//! stage.

use crate::error::{StabError, StabResult};
use crate::progress::ProgressReporter;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use vstab_models::{AffineTransform, CropRect, Displacement, FrameSize, ObservedMotion, Point2, Stage};

/// Frame rate assumed for an image sequence without fps information.
pub const DEFAULT_FPS: f64 = 30.0;

/// Name of the sidecar file describing an image sequence directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Sidecar metadata for an image sequence directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub fps: f64,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    /// Frame file names in playback order
    #[serde(default)]
    pub frames: Vec<String>,
}

/// Provider of raw frames in playback order.
pub trait FrameSource {
    /// Frames per second of the source.
    fn fps(&self) -> f64;

    /// Number of frames, when known up front.
    fn frame_count_hint(&self) -> Option<usize>;

    /// Read the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> StabResult<Option<RgbImage>>;
}

/// Frames held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    fps: f64,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn next_frame(&mut self) -> StabResult<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

/// A directory of still images, read in file name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    files: VecDeque<PathBuf>,
    total: usize,
    fps: f64,
}

impl ImageSequenceSource {
    /// Open `dir`. The frame rate comes from `fps`, else from the manifest,
    /// else [`DEFAULT_FPS`].
    pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> StabResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(StabError::input_unavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let manifest = read_manifest(dir)?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| {
                StabError::input_unavailable(format!("cannot read {}: {e}", dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(StabError::input_unavailable(format!(
                "no image frames found in {}",
                dir.display()
            )));
        }

        let fps = match (fps, manifest.as_ref()) {
            (Some(fps), _) => fps,
            (None, Some(manifest)) => manifest.fps,
            (None, None) => {
                warn!(
                    "[LOADING] No fps given and no {} in {}, assuming {}",
                    MANIFEST_FILE,
                    dir.display(),
                    DEFAULT_FPS
                );
                DEFAULT_FPS
            }
        };

        Ok(Self {
            total: files.len(),
            files: files.into(),
            fps,
        })
    }
}

fn read_manifest(dir: &Path) -> StabResult<Option<SequenceManifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg"
            )
        })
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count_hint(&self) -> Option<usize> {
        Some(self.total)
    }

    fn next_frame(&mut self) -> StabResult<Option<RgbImage>> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|e| {
            StabError::input_unavailable(format!("cannot decode {}: {e}", path.display()))
        })?;
        Ok(Some(image.to_rgb8()))
    }
}

/// One video frame plus everything the stages derive from it.
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    image: RgbImage,
    luma: GrayImage,
    features: Vec<Point2>,
    displacements: Vec<Displacement>,
    observed: Option<ObservedMotion>,
    update: Option<AffineTransform>,
}

impl Frame {
    fn new(index: usize, image: RgbImage) -> Self {
        let luma = image::imageops::grayscale(&image);
        Self {
            index,
            image,
            luma,
            features: Vec::new(),
            displacements: Vec::new(),
            observed: None,
            update: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Colour buffer used for rendering.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Grayscale buffer used for detection and tracking.
    pub fn luma(&self) -> &GrayImage {
        &self.luma
    }

    pub fn features(&self) -> &[Point2] {
        &self.features
    }

    /// Correspondences from this frame back to its predecessor.
    pub fn displacements(&self) -> &[Displacement] {
        &self.displacements
    }

    pub fn inlier_count(&self) -> usize {
        self.displacements.iter().filter(|d| d.inlier).count()
    }

    /// Observed motion into the previous frame, once estimated.
    pub fn observed(&self) -> Option<&ObservedMotion> {
        self.observed.as_ref()
    }

    /// Corrective transform, once the path is solved.
    pub fn update(&self) -> Option<&AffineTransform> {
        self.update.as_ref()
    }
}

/// A loaded video.
#[derive(Debug, Clone)]
pub struct Video {
    frames: Vec<Frame>,
    fps: f64,
    size: FrameSize,
    crop: Option<CropRect>,
}

impl Video {
    /// Read every frame from `source`.
    ///
    /// Fails with `InputUnavailable` for an empty source, a non-positive
    /// frame rate or frames whose size differs from the first one.
    pub fn load(source: &mut dyn FrameSource, reporter: &ProgressReporter) -> StabResult<Self> {
        let start = Instant::now();
        let fps = source.fps();
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(StabError::input_unavailable(format!("invalid frame rate {fps}")));
        }

        reporter.stage_started(Stage::Loading);
        let hint = source.frame_count_hint();
        let mut frames: Vec<Frame> = Vec::with_capacity(hint.unwrap_or(0));
        let mut size: Option<FrameSize> = None;

        while let Some(image) = source.next_frame()? {
            reporter.check_cancelled(Stage::Loading)?;
            let frame_size = FrameSize::new(image.width(), image.height());
            match size {
                None => {
                    if frame_size.width == 0 || frame_size.height == 0 {
                        return Err(StabError::input_unavailable("first frame is empty"));
                    }
                    size = Some(frame_size);
                }
                Some(expected) if expected != frame_size => {
                    return Err(StabError::input_unavailable(format!(
                        "frame {} is {}x{}, expected {}x{}",
                        frames.len(),
                        frame_size.width,
                        frame_size.height,
                        expected.width,
                        expected.height
                    )));
                }
                Some(_) => {}
            }

            let index = frames.len();
            frames.push(Frame::new(index, image));
            let total = hint.unwrap_or(index + 1).max(index + 1);
            reporter.progress(Stage::Loading, index + 1, total);
        }

        let Some(size) = size else {
            return Err(StabError::input_unavailable("source yielded no frames"));
        };

        reporter.stage_finished(Stage::Loading);
        info!(
            "[LOADING] Loaded {} frames ({}x{} @ {:.2} fps) in {:.2}s",
            frames.len(),
            size.width,
            size.height,
            fps,
            start.elapsed().as_secs_f64()
        );

        Ok(Self {
            frames,
            fps,
            size,
            crop: None,
        })
    }

    /// Build a video directly from frames held in memory.
    pub fn from_frames(frames: Vec<RgbImage>, fps: f64) -> StabResult<Self> {
        let mut source = MemorySource::new(frames, fps);
        Self::load(&mut source, &ProgressReporter::silent())
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Crop window shared by every rendered frame, once fixed.
    pub fn crop(&self) -> Option<CropRect> {
        self.crop
    }

    pub fn set_features(&mut self, features: Vec<Vec<Point2>>) {
        debug_assert_eq!(features.len(), self.frames.len());
        for (frame, points) in self.frames.iter_mut().zip(features) {
            frame.features = points;
        }
    }

    pub fn set_displacements(&mut self, displacements: Vec<Vec<Displacement>>) {
        debug_assert_eq!(displacements.len(), self.frames.len());
        for (frame, set) in self.frames.iter_mut().zip(displacements) {
            frame.displacements = set;
        }
    }

    /// Settle the inlier flags. Each inner vector matches the frame's
    /// displacements index for index.
    pub fn set_inlier_flags(&mut self, flags: Vec<Vec<bool>>) {
        debug_assert_eq!(flags.len(), self.frames.len());
        for (frame, frame_flags) in self.frames.iter_mut().zip(flags) {
            debug_assert_eq!(frame_flags.len(), frame.displacements.len());
            for (displacement, inlier) in frame.displacements.iter_mut().zip(frame_flags) {
                displacement.inlier = inlier;
            }
        }
    }

    pub fn set_observed(&mut self, observed: Vec<ObservedMotion>) {
        debug_assert_eq!(observed.len(), self.frames.len());
        for (frame, motion) in self.frames.iter_mut().zip(observed) {
            frame.observed = Some(motion);
        }
    }

    pub fn set_updates(&mut self, updates: Vec<AffineTransform>) {
        debug_assert_eq!(updates.len(), self.frames.len());
        for (frame, update) in self.frames.iter_mut().zip(updates) {
            frame.update = Some(update);
        }
    }

    pub fn set_crop(&mut self, crop: CropRect) {
        debug!("[CROP] Crop window fixed at {:?}", crop);
        self.crop = Some(crop);
    }

    /// Observed motion per frame, if the motion stage has run for every frame.
    pub fn observed_path(&self) -> Option<Vec<ObservedMotion>> {
        self.frames.iter().map(|f| f.observed).collect()
    }

    /// Corrective transforms per frame, if the path has been solved.
    pub fn update_path(&self) -> Option<Vec<AffineTransform>> {
        self.frames.iter().map(|f| f.update).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_load_memory_source() {
        let (reporter, rx) = ProgressReporter::channel();
        let mut source = MemorySource::new(vec![solid(8, 6, 0), solid(8, 6, 50), solid(8, 6, 100)], 24.0);
        let video = Video::load(&mut source, &reporter).unwrap();

        assert_eq!(video.len(), 3);
        assert_eq!(video.size(), FrameSize::new(8, 6));
        assert_eq!(video.fps(), 24.0);
        assert_eq!(video.frame(1).unwrap().luma().get_pixel(0, 0)[0], 50);
        assert!(video.crop().is_none());
        assert!(video.observed_path().is_none());

        let progress = rx
            .try_iter()
            .filter(|e| matches!(e, crate::progress::ProgressEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
    }

    #[test]
    fn test_load_rejects_empty_source() {
        let mut source = MemorySource::new(Vec::new(), 30.0);
        let err = Video::load(&mut source, &ProgressReporter::silent()).unwrap_err();
        assert!(matches!(err, StabError::InputUnavailable { .. }));
    }

    #[test]
    fn test_load_rejects_mismatched_sizes() {
        let mut source = MemorySource::new(vec![solid(8, 6, 0), solid(6, 8, 0)], 30.0);
        let err = Video::load(&mut source, &ProgressReporter::silent()).unwrap_err();
        assert!(matches!(err, StabError::InputUnavailable { .. }));
    }

    #[test]
    fn test_load_rejects_bad_fps() {
        let mut source = MemorySource::new(vec![solid(8, 6, 0)], 0.0);
        assert!(Video::load(&mut source, &ProgressReporter::silent()).is_err());
    }

    #[test]
    fn test_image_sequence_source_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("frame_0002.png", 20u8), ("frame_0000.png", 0), ("frame_0001.png", 10)] {
            solid(4, 4, value).save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), Some(12.0)).unwrap();
        assert_eq!(source.frame_count_hint(), Some(3));
        let video = Video::load(&mut source, &ProgressReporter::silent()).unwrap();
        let values: Vec<u8> = video.frames().iter().map(|f| f.image().get_pixel(0, 0)[0]).collect();
        assert_eq!(values, vec![0, 10, 20]);
        assert_eq!(video.fps(), 12.0);
    }

    #[test]
    fn test_image_sequence_fps_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        solid(4, 4, 0).save(dir.path().join("a.png")).unwrap();
        let manifest = SequenceManifest {
            fps: 25.0,
            frame_count: 1,
            width: 4,
            height: 4,
            frames: vec!["a.png".to_string()],
        };
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
        let source = ImageSequenceSource::open(dir.path(), None).unwrap();
        assert_eq!(source.fps(), 25.0);
    }

    #[test]
    fn test_image_sequence_missing_dir() {
        let err = ImageSequenceSource::open("/nonexistent/vstab/input", None).unwrap_err();
        assert!(matches!(err, StabError::InputUnavailable { .. }));
    }

    #[test]
    fn test_inlier_flags_written_in_place() {
        let mut video = Video::from_frames(vec![solid(4, 4, 0), solid(4, 4, 0)], 30.0).unwrap();
        let d = Displacement::new(Point2::new(1.0, 1.0), Point2::new(1.0, 1.0));
        video.set_displacements(vec![Vec::new(), vec![d, d, d]]);
        video.set_inlier_flags(vec![Vec::new(), vec![true, false, true]]);
        assert_eq!(video.frame(1).unwrap().displacements().len(), 3);
        assert_eq!(video.frame(1).unwrap().inlier_count(), 2);
    }
}
