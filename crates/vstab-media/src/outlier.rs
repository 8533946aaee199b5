//! Outlier rejector: per-frame consensus classification of displacements.
//!
//! Each frame runs its own consensus fit with a seed derived from the run
//! seed and the frame index, so results do not depend on whether frames are
//! processed sequentially or on the rayon pool.

use crate::config::RejectorConfig;
use crate::error::StabResult;
use crate::motion::{fit_affine, fit_similarity};
use crate::progress::ProgressReporter;
use crate::ransac::{ransac, Estimator, RansacOptions};
use crate::video::Video;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};
use vstab_models::{AffineTransform, Displacement, Point2, Stage};

/// Model fitted to each minimal sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusModel {
    /// Full affine map from 3 correspondences
    #[default]
    Affine,
    /// Scale, rotation and translation from 2 correspondences
    Similarity,
}

impl ConsensusModel {
    /// Minimal sample size of the model.
    pub fn min_samples(&self) -> usize {
        match self {
            ConsensusModel::Affine => AffineConsensus::MIN_SAMPLES,
            ConsensusModel::Similarity => SimilarityConsensus::MIN_SAMPLES,
        }
    }
}

fn sample_pairs(data: &[Displacement], indices: &[usize]) -> Vec<(Point2, Point2)> {
    indices
        .iter()
        .map(|&i| (data[i].source, data[i].destination))
        .collect()
}

fn transfer_error(model: &AffineTransform, datum: &Displacement) -> f64 {
    model.apply(&datum.source).distance(&datum.destination)
}

/// Affine consensus model.
pub struct AffineConsensus;

impl Estimator for AffineConsensus {
    type Datum = Displacement;
    type Model = AffineTransform;

    const MIN_SAMPLES: usize = 3;

    fn fit(data: &[Displacement], sample: &[usize]) -> Option<AffineTransform> {
        fit_affine(&sample_pairs(data, sample)).ok()
    }

    fn residual(model: &AffineTransform, datum: &Displacement) -> f64 {
        transfer_error(model, datum)
    }

    fn refit(data: &[Displacement], inliers: &[usize]) -> Option<AffineTransform> {
        fit_affine(&sample_pairs(data, inliers)).ok()
    }
}

/// Similarity consensus model.
pub struct SimilarityConsensus;

impl Estimator for SimilarityConsensus {
    type Datum = Displacement;
    type Model = AffineTransform;

    const MIN_SAMPLES: usize = 2;

    fn fit(data: &[Displacement], sample: &[usize]) -> Option<AffineTransform> {
        fit_similarity(&sample_pairs(data, sample)).ok()
    }

    fn residual(model: &AffineTransform, datum: &Displacement) -> f64 {
        transfer_error(model, datum)
    }

    fn refit(data: &[Displacement], inliers: &[usize]) -> Option<AffineTransform> {
        fit_similarity(&sample_pairs(data, inliers)).ok()
    }
}

/// Seed for one frame's consensus run (splitmix64 of run seed and index).
pub fn frame_seed(run_seed: u64, frame: usize) -> u64 {
    let mut z = run_seed ^ (frame as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Classifies every displacement as inlier or outlier.
#[derive(Debug, Clone)]
pub struct OutlierRejector {
    config: RejectorConfig,
    seed: u64,
    parallel: bool,
}

impl OutlierRejector {
    pub fn new(config: RejectorConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Inlier flags for one displacement set, index for index.
    ///
    /// Sets smaller than the model's minimal sample are all outliers.
    pub fn classify(&self, displacements: &[Displacement], seed: u64) -> Vec<bool> {
        let mut flags = vec![false; displacements.len()];
        if displacements.len() < self.config.model.min_samples() {
            return flags;
        }
        let opts = RansacOptions {
            max_iterations: self.config.max_iterations,
            threshold: self.config.threshold,
            confidence: self.config.confidence,
            seed,
        };
        let inliers = match self.config.model {
            ConsensusModel::Affine => ransac::<AffineConsensus>(displacements, &opts).inliers,
            ConsensusModel::Similarity => ransac::<SimilarityConsensus>(displacements, &opts).inliers,
        };
        for i in inliers {
            flags[i] = true;
        }
        flags
    }

    /// Inlier flags for every frame.
    pub fn reject(&self, video: &Video, reporter: &ProgressReporter) -> StabResult<Vec<Vec<bool>>> {
        let start = Instant::now();
        let n = video.len();
        reporter.stage_started(Stage::OutlierRejection);

        let classify_frame = |index: usize| -> StabResult<Vec<bool>> {
            reporter.check_cancelled(Stage::OutlierRejection)?;
            let displacements = video.frames()[index].displacements();
            let flags = self.classify(displacements, frame_seed(self.seed, index));
            debug!(
                "[OUTLIERS] Frame {}: {}/{} inliers",
                index,
                flags.iter().filter(|&&f| f).count(),
                flags.len()
            );
            Ok(flags)
        };

        let flags: Vec<Vec<bool>> = if self.parallel {
            let out = (0..n)
                .into_par_iter()
                .map(classify_frame)
                .collect::<StabResult<Vec<_>>>()?;
            for done in 1..=n {
                reporter.progress(Stage::OutlierRejection, done, n);
            }
            out
        } else {
            let mut out = Vec::with_capacity(n);
            for index in 0..n {
                out.push(classify_frame(index)?);
                reporter.progress(Stage::OutlierRejection, index + 1, n);
            }
            out
        };

        reporter.stage_finished(Stage::OutlierRejection);
        let total: usize = flags.iter().map(Vec::len).sum();
        let kept: usize = flags.iter().flatten().filter(|&&f| f).count();
        info!(
            "[OUTLIERS] Kept {}/{} displacements ({:?} model, seed {}) in {:.2}s",
            kept,
            total,
            self.config.model,
            self.seed,
            start.elapsed().as_secs_f64()
        );
        Ok(flags)
    }
}
