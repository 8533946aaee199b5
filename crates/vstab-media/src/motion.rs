//! Motion estimator: least-squares affine fit per frame.
//!
//! The fit is not robust; it runs on the inliers the outlier rejector left.
//! Coordinates are centred on their means before forming the 2x2 normal
//! equations, which keeps the system well conditioned for large frames.

use crate::config::MotionConfig;
use crate::error::StabResult;
use crate::progress::ProgressReporter;
use crate::video::Video;
use nalgebra::{Matrix2, Vector2};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};
use vstab_models::{AffineTransform, ObservedMotion, Point2, Stage, UnavailableReason};

/// Point pairs needed for a general affine fit.
pub const AFFINE_MIN_POINTS: usize = 3;

/// Relative determinant below which a point set counts as collinear.
const DEGENERACY_EPS: f64 = 1e-10;

struct Centred {
    src_mean: Vector2<f64>,
    dst_mean: Vector2<f64>,
    /// sum of u u^T over centred sources
    suu: Matrix2<f64>,
    /// sum of u v^T, sources against destinations
    suv: Matrix2<f64>,
}

fn centre(pairs: &[(Point2, Point2)]) -> Centred {
    let n = pairs.len() as f64;
    let mut src_mean = Vector2::zeros();
    let mut dst_mean = Vector2::zeros();
    for (s, d) in pairs {
        src_mean += Vector2::new(s.x, s.y);
        dst_mean += Vector2::new(d.x, d.y);
    }
    src_mean /= n;
    dst_mean /= n;

    let mut suu = Matrix2::zeros();
    let mut suv = Matrix2::zeros();
    for (s, d) in pairs {
        let u = Vector2::new(s.x, s.y) - src_mean;
        let v = Vector2::new(d.x, d.y) - dst_mean;
        suu += u * u.transpose();
        suv += u * v.transpose();
    }
    Centred {
        src_mean,
        dst_mean,
        suu,
        suv,
    }
}

fn from_linear(linear: &Matrix2<f64>, src_mean: &Vector2<f64>, dst_mean: &Vector2<f64>) -> AffineTransform {
    let t = dst_mean - linear * src_mean;
    AffineTransform::new(
        linear[(0, 0)],
        linear[(0, 1)],
        t.x,
        linear[(1, 0)],
        linear[(1, 1)],
        t.y,
    )
}

/// Least-squares 6-parameter affine map taking each source onto its destination.
pub fn fit_affine(pairs: &[(Point2, Point2)]) -> Result<AffineTransform, UnavailableReason> {
    if pairs.len() < AFFINE_MIN_POINTS {
        return Err(UnavailableReason::TooFewPoints {
            available: pairs.len(),
            required: AFFINE_MIN_POINTS,
        });
    }
    let c = centre(pairs);
    let trace = c.suu.trace();
    if trace <= f64::EPSILON || c.suu.determinant() <= DEGENERACY_EPS * trace * trace {
        return Err(UnavailableReason::Degenerate);
    }
    let inv = c.suu.try_inverse().ok_or(UnavailableReason::Degenerate)?;
    // (sum u u^T) A^T = sum u v^T
    let linear = (inv * c.suv).transpose();
    let transform = from_linear(&linear, &c.src_mean, &c.dst_mean);
    if !transform.is_finite() {
        return Err(UnavailableReason::Degenerate);
    }
    Ok(transform)
}

/// Least-squares similarity (scale, rotation, translation) map.
pub fn fit_similarity(pairs: &[(Point2, Point2)]) -> Result<AffineTransform, UnavailableReason> {
    if pairs.len() < 2 {
        return Err(UnavailableReason::TooFewPoints {
            available: pairs.len(),
            required: 2,
        });
    }
    let c = centre(pairs);
    let spread = c.suu.trace();
    if spread <= f64::EPSILON {
        return Err(UnavailableReason::Degenerate);
    }
    // suv[(i, j)] = sum u_i v_j
    let a = (c.suv[(0, 0)] + c.suv[(1, 1)]) / spread;
    let b = (c.suv[(0, 1)] - c.suv[(1, 0)]) / spread;
    let linear = Matrix2::new(a, -b, b, a);
    Ok(from_linear(&linear, &c.src_mean, &c.dst_mean))
}

/// Fits the observed frame-to-frame motion of every frame.
#[derive(Debug, Clone, Default)]
pub struct MotionEstimator {
    config: MotionConfig,
    parallel: bool,
}

impl MotionEstimator {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Observed motion for one frame's inlier displacements.
    pub fn estimate_frame(&self, video: &Video, index: usize) -> ObservedMotion {
        if index == 0 {
            return ObservedMotion::Unavailable {
                reason: UnavailableReason::NoPredecessor,
            };
        }
        let pairs: Vec<(Point2, Point2)> = video.frames()[index]
            .displacements()
            .iter()
            .filter(|d| d.inlier)
            .map(|d| (d.source, d.destination))
            .collect();

        let required = self.config.min_points.max(AFFINE_MIN_POINTS);
        if pairs.len() < required {
            return ObservedMotion::Unavailable {
                reason: UnavailableReason::TooFewPoints {
                    available: pairs.len(),
                    required,
                },
            };
        }
        match fit_affine(&pairs) {
            Ok(transform) => ObservedMotion::Available { transform },
            Err(reason) => ObservedMotion::Unavailable { reason },
        }
    }

    /// Observed motion for every frame, frame 0 included as `NoPredecessor`.
    pub fn estimate(&self, video: &Video, reporter: &ProgressReporter) -> StabResult<Vec<ObservedMotion>> {
        let start = Instant::now();
        let n = video.len();
        reporter.stage_started(Stage::OriginalMotion);

        let observed: Vec<ObservedMotion> = if self.parallel {
            reporter.check_cancelled(Stage::OriginalMotion)?;
            let out: Vec<ObservedMotion> = (0..n)
                .into_par_iter()
                .map(|index| self.estimate_frame(video, index))
                .collect();
            for done in 1..=n {
                reporter.progress(Stage::OriginalMotion, done, n);
            }
            out
        } else {
            let mut out = Vec::with_capacity(n);
            for index in 0..n {
                reporter.check_cancelled(Stage::OriginalMotion)?;
                out.push(self.estimate_frame(video, index));
                reporter.progress(Stage::OriginalMotion, index + 1, n);
            }
            out
        };

        for (index, motion) in observed.iter().enumerate().skip(1) {
            match motion {
                ObservedMotion::Available { transform } => {
                    debug!("[MOTION] Frame {}: {:?}", index, transform.to_array());
                }
                ObservedMotion::Unavailable { reason } => {
                    warn!("[MOTION] Frame {} has no observed transform: {}", index, reason);
                }
            }
        }

        reporter.stage_finished(Stage::OriginalMotion);
        let gaps = observed.iter().skip(1).filter(|m| !m.is_available()).count();
        info!(
            "[MOTION] Estimated {} transforms ({} gaps) in {:.2}s",
            n.saturating_sub(1) - gaps,
            gaps,
            start.elapsed().as_secs_f64()
        );
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_pairs(t: &AffineTransform) -> Vec<(Point2, Point2)> {
        let mut pairs = Vec::new();
        for i in 0..5 {
            for j in 0..4 {
                let p = Point2::new(100.0 + 37.0 * i as f64, 50.0 + 41.0 * j as f64);
                pairs.push((p, t.apply(&p)));
            }
        }
        pairs
    }

    #[test]
    fn test_affine_fit_reproduces_points() {
        let truth = AffineTransform::new(1.02, 0.03, -4.5, -0.01, 0.98, 2.25);
        let pairs = grid_pairs(&truth);
        let fitted = fit_affine(&pairs).unwrap();
        assert!(fitted.max_abs_diff(&truth) < 1e-9);
        for (s, d) in &pairs {
            let p = fitted.apply(s);
            assert_relative_eq!(p.x, d.x, epsilon = 1e-9);
            assert_relative_eq!(p.y, d.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_affine_fit_minimal_sample() {
        let truth = AffineTransform::translation(5.0, -3.0);
        let pairs: Vec<_> = [Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), Point2::new(0.0, 10.0)]
            .iter()
            .map(|p| (*p, truth.apply(p)))
            .collect();
        assert!(fit_affine(&pairs).unwrap().max_abs_diff(&truth) < 1e-12);
    }

    #[test]
    fn test_affine_fit_failures() {
        let two = vec![
            (Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
            (Point2::new(5.0, 0.0), Point2::new(6.0, 1.0)),
        ];
        assert_eq!(
            fit_affine(&two),
            Err(UnavailableReason::TooFewPoints {
                available: 2,
                required: 3
            })
        );

        let collinear: Vec<_> = (0..6)
            .map(|i| {
                let p = Point2::new(i as f64, 2.0 * i as f64);
                (p, Point2::new(p.x + 1.0, p.y))
            })
            .collect();
        assert_eq!(fit_affine(&collinear), Err(UnavailableReason::Degenerate));
    }

    #[test]
    fn test_similarity_fit() {
        let truth = AffineTransform::similarity(1.05, 0.1, 3.0, -7.0);
        let pairs = grid_pairs(&truth);
        let fitted = fit_similarity(&pairs).unwrap();
        assert!(fitted.max_abs_diff(&truth) < 1e-9);

        let same = vec![(Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)); 2];
        assert_eq!(fit_similarity(&same), Err(UnavailableReason::Degenerate));
    }
}
