//! Feature tracker: keypoint detection and backward frame-to-frame tracking.
//!
//! Detection runs forward over the video. Tracking runs from the last frame
//! to the first, following each keypoint of frame `t` into frame `t - 1`.
//! Points the flow primitive loses are dropped; everything else becomes a
//! [`Displacement`] owned by frame `t`.

use crate::error::StabResult;
use crate::features::{FeatureDetector, OpticalFlow};
use crate::progress::ProgressReporter;
use crate::video::Video;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};
use vstab_models::{Displacement, Point2, Stage};

/// Detector plus flow primitive, selected when the pipeline is built.
pub struct FeatureTracker {
    detector: Box<dyn FeatureDetector>,
    flow: Box<dyn OpticalFlow>,
    parallel: bool,
}

impl FeatureTracker {
    pub fn new(detector: Box<dyn FeatureDetector>, flow: Box<dyn OpticalFlow>) -> Self {
        Self {
            detector,
            flow,
            parallel: true,
        }
    }

    /// Process frames on the rayon pool. Output order is unchanged.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Detect keypoints for every frame. Frames that already carry features
    /// keep them.
    pub fn detect(&self, video: &Video, reporter: &ProgressReporter) -> StabResult<Vec<Vec<Point2>>> {
        let start = Instant::now();
        let total = video.len();
        reporter.stage_started(Stage::FeatureDetection);

        let detect_one = |index: usize| -> StabResult<Vec<Point2>> {
            reporter.check_cancelled(Stage::FeatureDetection)?;
            let frame = &video.frames()[index];
            if !frame.features().is_empty() {
                return Ok(frame.features().to_vec());
            }
            let points = self.detector.detect(frame.luma());
            if points.is_empty() {
                warn!("[DETECTION] Frame {} has no trackable features", index);
            } else {
                debug!("[DETECTION] Frame {}: {} features", index, points.len());
            }
            Ok(points)
        };

        let features: Vec<Vec<Point2>> = if self.parallel {
            (0..total)
                .into_par_iter()
                .map(detect_one)
                .collect::<StabResult<Vec<_>>>()?
        } else {
            let mut out = Vec::with_capacity(total);
            for index in 0..total {
                out.push(detect_one(index)?);
                reporter.progress(Stage::FeatureDetection, index + 1, total);
            }
            out
        };
        if self.parallel {
            for done in 1..=total {
                reporter.progress(Stage::FeatureDetection, done, total);
            }
        }

        reporter.stage_finished(Stage::FeatureDetection);
        let count: usize = features.iter().map(Vec::len).sum();
        info!(
            "[DETECTION] {} features over {} frames with {} in {:.2}s",
            count,
            total,
            self.detector.name(),
            start.elapsed().as_secs_f64()
        );
        Ok(features)
    }

    /// Track each frame's features into its predecessor, last frame first.
    ///
    /// `features[t]` are the keypoints of frame `t`. The returned vector is
    /// indexed by frame; frame 0 always gets an empty set.
    pub fn track(
        &self,
        video: &Video,
        features: &[Vec<Point2>],
        reporter: &ProgressReporter,
    ) -> StabResult<Vec<Vec<Displacement>>> {
        let start = Instant::now();
        let n = video.len();
        let total = n.saturating_sub(1);
        reporter.stage_started(Stage::FeatureTracking);

        let track_one = |t: usize| -> StabResult<Vec<Displacement>> {
            reporter.check_cancelled(Stage::FeatureTracking)?;
            let points = &features[t];
            if points.is_empty() {
                return Ok(Vec::new());
            }
            let frames = video.frames();
            let results = self.flow.track(frames[t].luma(), frames[t - 1].luma(), points);
            let displacements: Vec<Displacement> = points
                .iter()
                .zip(results)
                .filter(|(_, r)| r.tracked && r.position.is_finite())
                .map(|(source, r)| Displacement::new(*source, r.position))
                .collect();
            debug!(
                "[TRACKING] Frame {} -> {}: {}/{} tracked",
                t,
                t - 1,
                displacements.len(),
                points.len()
            );
            Ok(displacements)
        };

        // backward processing order: n-1, n-2, ..., 1
        let order: Vec<usize> = (1..n).rev().collect();
        let tracked: Vec<Vec<Displacement>> = if self.parallel {
            let out = order
                .par_iter()
                .map(|&t| track_one(t))
                .collect::<StabResult<Vec<_>>>()?;
            for done in 1..=total {
                reporter.progress(Stage::FeatureTracking, done, total);
            }
            out
        } else {
            let mut out = Vec::with_capacity(total);
            for (done, &t) in order.iter().enumerate() {
                out.push(track_one(t)?);
                reporter.progress(Stage::FeatureTracking, done + 1, total);
            }
            out
        };

        let mut displacements: Vec<Vec<Displacement>> = vec![Vec::new(); n];
        for (t, set) in order.into_iter().zip(tracked) {
            displacements[t] = set;
        }

        reporter.stage_finished(Stage::FeatureTracking);
        let count: usize = displacements.iter().map(Vec::len).sum();
        info!(
            "[TRACKING] {} displacements over {} frame pairs in {:.2}s",
            count,
            total,
            start.elapsed().as_secs_f64()
        );
        Ok(displacements)
    }
}
