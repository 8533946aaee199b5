//! Stabilization pipeline orchestrator.
//!
//! [`Stabilizer`] owns the loaded video and drives the stages strictly in
//! order:
//!
//! 1. `load`: read every frame from a [`FrameSource`]
//! 2. `calculate_global_motion`: detect, track, reject outliers, fit motion
//! 3. `calculate_update_transform`: solve the L1 camera path
//! 4. `apply_crop_transform`: fix the crop window and render
//! 5. `save`: hand the rendered frames to a [`FrameSink`]
//!
//! Each step checks that its predecessor has completed and that nobody has
//! requested cancellation.

use crate::config::StabilizerConfig;
use crate::crop::{resolve_window, CropRenderer, RenderedVideo};
use crate::error::{StabError, StabResult};
use crate::features::{create_detector, create_flow, FeatureDetector, OpticalFlow};
use crate::motion::MotionEstimator;
use crate::outlier::OutlierRejector;
use crate::path::{CameraPath, LpSolver, PathOptimizer, SimplexSolver};
use crate::progress::ProgressReporter;
use crate::sink::FrameSink;
use crate::tracker::FeatureTracker;
use crate::video::{FrameSource, Video};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use vstab_models::{AffineTransform, CropRect, FrameSize, ObservedMotion, Stage};

/// Per-frame summary in a [`StabilizationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub index: usize,
    pub features: usize,
    pub displacements: usize,
    pub inliers: usize,
    pub observed: Option<ObservedMotion>,
    pub update: Option<AffineTransform>,
}

/// Serializable summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationReport {
    pub frame_count: usize,
    pub fps: f64,
    pub frame_size: FrameSize,
    pub seed: u64,
    pub detector: String,
    /// Last stage that completed
    pub completed: Option<Stage>,
    pub frames: Vec<FrameReport>,
    pub bridged_frames: Vec<usize>,
    pub objective: Option<f64>,
    pub crop: Option<CropRect>,
}

/// Runs the stabilization stages over one video.
pub struct Stabilizer {
    config: StabilizerConfig,
    seed: u64,
    tracker: FeatureTracker,
    rejector: OutlierRejector,
    motion: MotionEstimator,
    path: PathOptimizer,
    renderer: CropRenderer,
    reporter: ProgressReporter,
    video: Option<Video>,
    camera_path: Option<CameraPath>,
    rendered: Option<RenderedVideo>,
    completed: Option<Stage>,
}

impl Stabilizer {
    /// Pipeline with the detector and flow selected by the config and the
    /// simplex LP solver.
    pub fn new(config: StabilizerConfig) -> StabResult<Self> {
        let detector = create_detector(&config.tracker);
        let flow = create_flow(&config.tracker);
        Self::with_components(config, detector, flow, Box::new(SimplexSolver))
    }

    /// Pipeline with caller-supplied primitives.
    pub fn with_components(
        config: StabilizerConfig,
        detector: Box<dyn FeatureDetector>,
        flow: Box<dyn OpticalFlow>,
        solver: Box<dyn LpSolver>,
    ) -> StabResult<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let parallel = config.parallel;
        Ok(Self {
            tracker: FeatureTracker::new(detector, flow).with_parallel(parallel),
            rejector: OutlierRejector::new(config.rejector.clone(), seed).with_parallel(parallel),
            motion: MotionEstimator::new(config.motion.clone()).with_parallel(parallel),
            path: PathOptimizer::new(config.path.clone(), solver),
            renderer: CropRenderer::new(config.crop.clone()),
            reporter: ProgressReporter::silent(),
            video: None,
            camera_path: None,
            rendered: None,
            completed: None,
            seed,
            config,
        })
    }

    /// Route progress events and cancellation through `reporter`.
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Seed used for outlier sampling in this pipeline.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn video(&self) -> Option<&Video> {
        self.video.as_ref()
    }

    pub fn camera_path(&self) -> Option<&CameraPath> {
        self.camera_path.as_ref()
    }

    pub fn rendered(&self) -> Option<&RenderedVideo> {
        self.rendered.as_ref()
    }

    /// Last stage that completed.
    pub fn completed(&self) -> Option<Stage> {
        self.completed
    }

    /// Discard the loaded video and everything derived from it.
    pub fn reset(&mut self) {
        self.video = None;
        self.camera_path = None;
        self.rendered = None;
        self.completed = None;
    }

    fn require(&self, stage: Stage) -> StabResult<()> {
        self.reporter.check_cancelled(stage)?;
        if let Some(required) = stage.predecessor() {
            if self.completed.map_or(true, |done| done < required) {
                return Err(StabError::StageOrder { stage, required });
            }
        }
        Ok(())
    }

    fn video_mut(&mut self, stage: Stage) -> StabResult<&mut Video> {
        self.video.as_mut().ok_or(StabError::StageOrder {
            stage,
            required: Stage::Loading,
        })
    }

    fn loaded(&self, stage: Stage) -> StabResult<&Video> {
        self.video.as_ref().ok_or(StabError::StageOrder {
            stage,
            required: Stage::Loading,
        })
    }

    /// Read every frame from `source`, replacing any previous video.
    pub fn load(&mut self, source: &mut dyn FrameSource) -> StabResult<()> {
        self.reporter.check_cancelled(Stage::Loading)?;
        self.reset();
        let video = Video::load(source, &self.reporter)?;
        self.video = Some(video);
        self.completed = Some(Stage::Loading);
        Ok(())
    }

    /// Detect, track, reject outliers and estimate the observed motion.
    pub fn calculate_global_motion(&mut self) -> StabResult<()> {
        let start = Instant::now();
        self.require(Stage::FeatureDetection)?;
        self.camera_path = None;
        self.rendered = None;

        let features = self.tracker.detect(self.loaded(Stage::FeatureDetection)?, &self.reporter)?;
        self.video_mut(Stage::FeatureDetection)?.set_features(features);
        self.completed = Some(Stage::FeatureDetection);

        self.require(Stage::FeatureTracking)?;
        let video = self.loaded(Stage::FeatureTracking)?;
        let features: Vec<_> = video.frames().iter().map(|f| f.features().to_vec()).collect();
        let displacements = self.tracker.track(video, &features, &self.reporter)?;
        self.video_mut(Stage::FeatureTracking)?.set_displacements(displacements);
        self.completed = Some(Stage::FeatureTracking);

        self.require(Stage::OutlierRejection)?;
        let flags = self.rejector.reject(self.loaded(Stage::OutlierRejection)?, &self.reporter)?;
        self.video_mut(Stage::OutlierRejection)?.set_inlier_flags(flags);
        self.completed = Some(Stage::OutlierRejection);

        self.require(Stage::OriginalMotion)?;
        let observed = self.motion.estimate(self.loaded(Stage::OriginalMotion)?, &self.reporter)?;
        self.video_mut(Stage::OriginalMotion)?.set_observed(observed);
        self.completed = Some(Stage::OriginalMotion);

        info!(
            "[MOTION] Global motion for {} frames DONE in {:.2}s",
            self.loaded(Stage::OriginalMotion)?.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Solve the corrective transform of every frame.
    pub fn calculate_update_transform(&mut self) -> StabResult<()> {
        self.require(Stage::UpdateTransform)?;
        self.rendered = None;
        let video = self.loaded(Stage::UpdateTransform)?;
        let observed = video.observed_path().ok_or(StabError::StageOrder {
            stage: Stage::UpdateTransform,
            required: Stage::OriginalMotion,
        })?;
        let window = resolve_window(&self.config.crop.window, video.size())?;
        let path = self.path.optimize(&observed, video.size(), window, &self.reporter)?;

        self.video_mut(Stage::UpdateTransform)?.set_updates(path.updates.clone());
        self.camera_path = Some(path);
        self.completed = Some(Stage::UpdateTransform);
        Ok(())
    }

    /// Fix the crop window and render every frame.
    pub fn apply_crop_transform(&mut self) -> StabResult<()> {
        self.require(Stage::CropTransform)?;
        let video = self.loaded(Stage::CropTransform)?;
        let updates = video.update_path().ok_or(StabError::StageOrder {
            stage: Stage::CropTransform,
            required: Stage::UpdateTransform,
        })?;
        let window = self.renderer.final_window(video.size(), &updates)?;
        let rendered = self.renderer.render(video, window, &self.reporter)?;

        self.video_mut(Stage::CropTransform)?.set_crop(window);
        self.rendered = Some(rendered);
        self.completed = Some(Stage::CropTransform);
        Ok(())
    }

    /// Hand the rendered frames to `sink`.
    pub fn save(&mut self, sink: &mut dyn FrameSink) -> StabResult<()> {
        self.require(Stage::Saving)?;
        let rendered = self.rendered.as_ref().ok_or(StabError::StageOrder {
            stage: Stage::Saving,
            required: Stage::CropTransform,
        })?;
        self.reporter.stage_started(Stage::Saving);
        sink.save(rendered, &self.reporter)?;
        self.reporter.stage_finished(Stage::Saving);
        self.completed = Some(Stage::Saving);
        Ok(())
    }

    /// All stages, from loading to saving.
    pub fn run(&mut self, source: &mut dyn FrameSource, sink: &mut dyn FrameSink) -> StabResult<StabilizationReport> {
        let start = Instant::now();
        self.load(source)?;
        self.calculate_global_motion()?;
        self.calculate_update_transform()?;
        self.apply_crop_transform()?;
        self.save(sink)?;
        let report = self.report()?;
        info!(
            "[PIPELINE] Stabilized {} frames in {:.2}s (objective {:.4}, {} bridged)",
            report.frame_count,
            start.elapsed().as_secs_f64(),
            report.objective.unwrap_or_default(),
            report.bridged_frames.len()
        );
        Ok(report)
    }

    /// Summary of what has been computed so far.
    pub fn report(&self) -> StabResult<StabilizationReport> {
        let video = self.loaded(Stage::Loading)?;
        let frames = video
            .frames()
            .iter()
            .map(|f| FrameReport {
                index: f.index(),
                features: f.features().len(),
                displacements: f.displacements().len(),
                inliers: f.inlier_count(),
                observed: f.observed().copied(),
                update: f.update().copied(),
            })
            .collect();
        Ok(StabilizationReport {
            frame_count: video.len(),
            fps: video.fps(),
            frame_size: video.size(),
            seed: self.seed,
            detector: self.tracker.detector_name().to_string(),
            completed: self.completed,
            frames,
            bridged_frames: self
                .camera_path
                .as_ref()
                .map(|p| p.bridged_frames.clone())
                .unwrap_or_default(),
            objective: self.camera_path.as_ref().map(|p| p.objective),
            crop: video.crop(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::MemorySource;
    use image::{Rgb, RgbImage};

    fn source() -> MemorySource {
        MemorySource::new(vec![RgbImage::from_pixel(32, 32, Rgb([0, 0, 0])); 3], 30.0)
    }

    fn stabilizer() -> Stabilizer {
        let config = StabilizerConfig {
            seed: Some(1),
            ..StabilizerConfig::default()
        };
        Stabilizer::new(config).unwrap()
    }

    #[test]
    fn test_stage_order_enforced() {
        let mut stab = stabilizer();
        match stab.calculate_global_motion() {
            Err(StabError::StageOrder { stage, required }) => {
                assert_eq!(stage, Stage::FeatureDetection);
                assert_eq!(required, Stage::Loading);
            }
            other => panic!("expected stage order error, got {other:?}"),
        }

        stab.load(&mut source()).unwrap();
        assert!(matches!(
            stab.calculate_update_transform(),
            Err(StabError::StageOrder {
                required: Stage::OriginalMotion,
                ..
            })
        ));
        assert!(matches!(
            stab.save(&mut crate::sink::MemorySink::new()),
            Err(StabError::StageOrder { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StabilizerConfig::default();
        config.motion.min_points = 1;
        assert!(matches!(Stabilizer::new(config), Err(StabError::InvalidConfig(_))));
    }

    #[test]
    fn test_reset_discards_video() {
        let mut stab = stabilizer();
        stab.load(&mut source()).unwrap();
        assert_eq!(stab.report().unwrap().frame_count, 3);
        stab.reset();
        assert!(stab.video().is_none());
        assert!(stab.report().is_err());
        assert_eq!(stab.completed(), None);
    }

    #[test]
    fn test_cancel_between_stages() {
        let mut stab = stabilizer();
        stab.load(&mut source()).unwrap();
        stab.reporter().cancellation_token().cancel();
        let err = stab.calculate_global_motion().unwrap_err();
        assert!(matches!(
            err,
            StabError::Cancelled {
                stage: Stage::FeatureDetection
            }
        ));
    }

    #[test]
    fn test_seed_from_config() {
        assert_eq!(stabilizer().seed(), 1);
    }
}
