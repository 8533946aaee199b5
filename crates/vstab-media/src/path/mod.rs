//! L1 optimal camera path.
//!
//! Builds one linear program over the corrective transforms `B(1..N-1)` and
//! hands it to an [`LpSolver`]. With observed motion `F(t)` (frame `t` into
//! frame `t - 1`) the stabilized path changes between frames by
//!
//! ```text
//! R(t) = F(t+1) * B(t+1) - B(t)          t = 0..N-2, B(0) = I
//! ```
//!
//! and the objective is
//!
//! ```text
//! lambda_position     * sum |p(t) - identity|
//! + lambda_velocity     * sum |R(t)|
//! + lambda_acceleration * sum |R(t+1) - R(t)|
//! + lambda_jerk         * sum |R(t+2) - 2 R(t+1) + R(t)|
//! ```
//!
//! with every absolute value linearized by a slack `s >= 0` and the rows
//! `e <= s`, `-e <= s`. Scale and shear components are weighted by
//! `linear_weight` relative to translation.
//!
//! Hard constraints keep `B(t)` inside the safety envelope, bound the
//! corrective translation and keep every crop corner inside the frame once
//! mapped by `B(t)`.

pub mod lp;
pub mod params;

pub use lp::{LinearExpr, LinearProgram, LpSolution, LpSolver, Relation, SimplexSolver, Var};
pub use params::{AffineExpr, FrameParams, ParamBounds};

use crate::config::PathOptimizerConfig;
use crate::error::{StabError, StabResult};
use crate::progress::ProgressReporter;
use params::is_translation_component;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};
use vstab_models::{AffineTransform, CropRect, FrameSize, ObservedMotion, Stage};

/// Solved corrective path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPath {
    /// Corrective transform per frame; `updates[0]` is the identity
    pub updates: Vec<AffineTransform>,
    /// Optimal objective value
    pub objective: f64,
    /// Frames whose observed motion was interpolated for the solve
    pub bridged_frames: Vec<usize>,
}

/// Replace unavailable observed motion with interpolated transforms.
///
/// Returns one transform per frame (index 0 is the identity placeholder)
/// plus the indices that were bridged. Each gap takes the linear blend of
/// the nearest available neighbours, or the single neighbour at either end.
pub fn bridge_gaps(
    observed: &[ObservedMotion],
    max_gap_frames: usize,
) -> StabResult<(Vec<AffineTransform>, Vec<usize>)> {
    let n = observed.len();
    let mut transforms = vec![AffineTransform::identity(); n];
    if n <= 1 {
        return Ok((transforms, Vec::new()));
    }

    let available: Vec<usize> = (1..n).filter(|&t| observed[t].is_available()).collect();
    if available.is_empty() {
        return Err(StabError::insufficient_data(
            Stage::UpdateTransform,
            None,
            "no frame has an observed transform",
        ));
    }

    let mut bridged = Vec::new();
    let mut t = 1;
    while t < n {
        if let Some(transform) = observed[t].transform() {
            transforms[t] = *transform;
            t += 1;
            continue;
        }

        let gap_start = t;
        while t < n && !observed[t].is_available() {
            t += 1;
        }
        let gap_end = t; // exclusive
        let length = gap_end - gap_start;
        if length > max_gap_frames {
            return Err(StabError::insufficient_data(
                Stage::UpdateTransform,
                Some(gap_start),
                format!("gap of {length} frames exceeds the bridgeable {max_gap_frames}"),
            ));
        }

        let left = (gap_start > 1).then(|| gap_start - 1);
        let right = (gap_end < n).then_some(gap_end);
        for k in gap_start..gap_end {
            transforms[k] = match (left, right) {
                (Some(l), Some(r)) => {
                    let a = observed[l].transform().copied().unwrap_or_default().to_array();
                    let b = observed[r].transform().copied().unwrap_or_default().to_array();
                    let w = (k - l) as f64 / (r - l) as f64;
                    AffineTransform::from_array(std::array::from_fn(|i| a[i] + w * (b[i] - a[i])))
                }
                (Some(l), None) => observed[l].transform().copied().unwrap_or_default(),
                (None, Some(r)) => observed[r].transform().copied().unwrap_or_default(),
                (None, None) => AffineTransform::identity(),
            };
            bridged.push(k);
        }
    }

    Ok((transforms, bridged))
}

/// Builds and solves the camera path program.
pub struct PathOptimizer {
    config: PathOptimizerConfig,
    solver: Box<dyn LpSolver>,
}

impl PathOptimizer {
    pub fn new(config: PathOptimizerConfig, solver: Box<dyn LpSolver>) -> Self {
        Self { config, solver }
    }

    pub fn config(&self) -> &PathOptimizerConfig {
        &self.config
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    fn component_weight(&self, index: usize) -> f64 {
        if is_translation_component(index) {
            1.0
        } else {
            self.config.linear_weight
        }
    }

    fn penalize(&self, lp: &mut LinearProgram, expr: &AffineExpr, lambda: f64) {
        if lambda <= 0.0 {
            return;
        }
        for (index, entry) in expr.components() {
            if entry.is_constant() && entry.constant_part() == 0.0 {
                continue;
            }
            lp.add_abs_penalty(entry, lambda * self.component_weight(index));
        }
    }

    /// Assemble the program for the given observed path (already bridged).
    ///
    /// Returns the program and the parameter variables of frames `1..N-1`.
    pub fn build_program(
        &self,
        motion: &[AffineTransform],
        frame: FrameSize,
        crop: CropRect,
    ) -> (LinearProgram, Vec<FrameParams>) {
        let cfg = &self.config;
        let n = motion.len();
        let mut lp = LinearProgram::new();

        let bounds = ParamBounds {
            scale: (1.0 - cfg.max_scale_dev, 1.0 + cfg.max_scale_dev),
            shear: cfg.max_shear,
            tx: cfg.max_translation_ratio * frame.width as f64,
            ty: cfg.max_translation_ratio * frame.height as f64,
        };
        let params: Vec<FrameParams> = (1..n).map(|_| FrameParams::register(&mut lp, &bounds)).collect();

        let mut path: Vec<AffineExpr> = Vec::with_capacity(n);
        path.push(AffineExpr::identity());
        path.extend(params.iter().map(AffineExpr::from_params));

        // fidelity to the identity correction
        if cfg.lambda_position > 0.0 {
            for p in &params {
                for (var, identity, translation) in p.with_identity() {
                    let mut e = LinearExpr::var(var);
                    e.add_constant(-identity);
                    let weight = if translation { 1.0 } else { cfg.linear_weight };
                    lp.add_abs_penalty(&e, cfg.lambda_position * weight);
                }
            }
        }

        // stabilized path velocity R(t) and its differences
        let velocity: Vec<AffineExpr> = (0..n.saturating_sub(1))
            .map(|t| path[t + 1].premultiply(&motion[t + 1]).minus(&path[t]))
            .collect();
        for r in &velocity {
            self.penalize(&mut lp, r, cfg.lambda_velocity);
        }
        for pair in velocity.windows(2) {
            self.penalize(&mut lp, &pair[1].minus(&pair[0]), cfg.lambda_acceleration);
        }
        for triple in velocity.windows(3) {
            let jerk = triple[2].plus_scaled(&triple[1], -2.0).plus_scaled(&triple[0], 1.0);
            self.penalize(&mut lp, &jerk, cfg.lambda_jerk);
        }

        // safety envelope on the combined shear
        for p in &params {
            let mut sum = LinearExpr::var(p.shear_x);
            sum.add_term(p.shear_y, 1.0);
            lp.add_constraint(&sum, Relation::Le, cfg.max_shear_sum);
            lp.add_constraint(&sum, Relation::Ge, -cfg.max_shear_sum);
        }

        // crop containment
        let max_x = frame.width.saturating_sub(1) as f64;
        let max_y = frame.height.saturating_sub(1) as f64;
        for expr in path.iter().skip(1) {
            for corner in crop.corners() {
                let (x, y) = expr.apply(corner.x, corner.y);
                lp.add_constraint(&x, Relation::Ge, 0.0);
                lp.add_constraint(&x, Relation::Le, max_x);
                lp.add_constraint(&y, Relation::Ge, 0.0);
                lp.add_constraint(&y, Relation::Le, max_y);
            }
        }

        (lp, params)
    }

    /// Solve for the corrective transform of every frame.
    ///
    /// `observed[0]` is ignored. Gaps are bridged first; a solver failure is
    /// returned as [`StabError::SolverFailed`] and no transform is produced.
    pub fn optimize(
        &self,
        observed: &[ObservedMotion],
        frame: FrameSize,
        crop: CropRect,
        reporter: &ProgressReporter,
    ) -> StabResult<CameraPath> {
        let start = Instant::now();
        let n = observed.len();
        if n == 0 {
            return Err(StabError::insufficient_data(Stage::UpdateTransform, None, "empty video"));
        }
        reporter.stage_started(Stage::UpdateTransform);

        if n == 1 {
            reporter.progress(Stage::UpdateTransform, 3, 3);
            reporter.stage_finished(Stage::UpdateTransform);
            return Ok(CameraPath {
                updates: vec![AffineTransform::identity()],
                objective: 0.0,
                bridged_frames: Vec::new(),
            });
        }

        let (motion, bridged) = bridge_gaps(observed, self.config.max_gap_frames)?;
        if !bridged.is_empty() {
            warn!("[L1_PATH] Bridged {} frames without observed motion: {:?}", bridged.len(), bridged);
        }
        reporter.progress(Stage::UpdateTransform, 1, 3);
        info!(
            "[L1_PATH] Step 1/3 DONE in {:.2}s - {} frames, {} bridged",
            start.elapsed().as_secs_f64(),
            n,
            bridged.len()
        );

        let step_start = Instant::now();
        let (lp, params) = self.build_program(&motion, frame, crop);
        let variables = lp.num_vars();
        let constraints = lp.num_constraints();
        reporter.progress(Stage::UpdateTransform, 2, 3);
        info!(
            "[L1_PATH] Step 2/3 DONE in {:.2}s - {} variables, {} constraints",
            step_start.elapsed().as_secs_f64(),
            variables,
            constraints
        );

        // the solve itself is not interruptible
        reporter.check_cancelled(Stage::UpdateTransform)?;
        let step_start = Instant::now();
        let solution = self.solver.solve(&lp).map_err(|failure| StabError::SolverFailed {
            failure,
            variables,
            constraints,
        })?;
        reporter.progress(Stage::UpdateTransform, 3, 3);
        info!(
            "[L1_PATH] Step 3/3 DONE in {:.2}s - {} objective {:.6}",
            step_start.elapsed().as_secs_f64(),
            self.solver.name(),
            solution.objective
        );

        let mut updates = Vec::with_capacity(n);
        updates.push(AffineTransform::identity());
        updates.extend(params.iter().map(|p| p.extract(&solution)));
        for (t, update) in updates.iter().enumerate() {
            debug!("[L1_PATH] Frame {} update {:?}", t, update.to_array());
        }

        reporter.stage_finished(Stage::UpdateTransform);
        info!(
            "[L1_PATH] Camera path for {} frames solved in {:.2}s",
            n,
            start.elapsed().as_secs_f64()
        );
        Ok(CameraPath {
            updates,
            objective: solution.objective,
            bridged_frames: bridged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolveFailure;
    use approx::assert_abs_diff_eq;
    use vstab_models::UnavailableReason;

    fn available(t: AffineTransform) -> ObservedMotion {
        ObservedMotion::Available { transform: t }
    }

    fn gap() -> ObservedMotion {
        ObservedMotion::Unavailable {
            reason: UnavailableReason::TooFewPoints {
                available: 0,
                required: 3,
            },
        }
    }

    fn first() -> ObservedMotion {
        ObservedMotion::Unavailable {
            reason: UnavailableReason::NoPredecessor,
        }
    }

    fn optimizer() -> PathOptimizer {
        PathOptimizer::new(PathOptimizerConfig::default(), Box::new(SimplexSolver))
    }

    const FRAME: FrameSize = FrameSize {
        width: 64,
        height: 48,
    };

    #[test]
    fn test_bridge_interpolates() {
        let observed = vec![
            first(),
            available(AffineTransform::translation(2.0, 0.0)),
            gap(),
            gap(),
            available(AffineTransform::translation(8.0, 3.0)),
        ];
        let (motion, bridged) = bridge_gaps(&observed, 2).unwrap();
        assert_eq!(bridged, vec![2, 3]);
        assert_abs_diff_eq!(motion[2].m[0][2], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(motion[3].m[0][2], 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(motion[3].m[1][2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bridge_edges_copy_neighbour() {
        let observed = vec![first(), gap(), available(AffineTransform::translation(1.0, 1.0)), gap()];
        let (motion, bridged) = bridge_gaps(&observed, 3).unwrap();
        assert_eq!(bridged, vec![1, 3]);
        assert_eq!(motion[1], AffineTransform::translation(1.0, 1.0));
        assert_eq!(motion[3], AffineTransform::translation(1.0, 1.0));
    }

    #[test]
    fn test_bridge_rejects_long_gap() {
        let observed = vec![
            first(),
            available(AffineTransform::identity()),
            gap(),
            gap(),
            gap(),
            available(AffineTransform::identity()),
        ];
        match bridge_gaps(&observed, 2) {
            Err(StabError::InsufficientData { stage, frame, .. }) => {
                assert_eq!(stage, Stage::UpdateTransform);
                assert_eq!(frame, Some(2));
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
        let all_gaps = vec![first(), gap(), gap()];
        assert!(bridge_gaps(&all_gaps, 10).is_err());
    }

    #[test]
    fn test_identity_motion_gives_identity_path() {
        let observed: Vec<ObservedMotion> = std::iter::once(first())
            .chain((1..8).map(|_| available(AffineTransform::identity())))
            .collect();
        let crop = CropRect::centered(FRAME, 0.8);
        let path = optimizer()
            .optimize(&observed, FRAME, crop, &ProgressReporter::silent())
            .unwrap();
        assert_eq!(path.updates.len(), 8);
        assert_abs_diff_eq!(path.objective, 0.0, epsilon = 1e-6);
        for update in &path.updates {
            assert!(update.max_abs_diff(&AffineTransform::identity()) < 1e-6);
        }
    }

    #[test]
    fn test_jitter_is_absorbed_within_bounds() {
        let jitter = [0.0, 1.5, -1.0, 2.0, -2.0, 1.0, 0.0, -1.5, 1.0];
        let observed: Vec<ObservedMotion> = std::iter::once(first())
            .chain(jitter.iter().map(|&dx| available(AffineTransform::translation(dx, -dx))))
            .collect();
        let crop = CropRect::centered(FRAME, 0.8);
        let config = PathOptimizerConfig::default();
        let path = optimizer()
            .optimize(&observed, FRAME, crop, &ProgressReporter::silent())
            .unwrap();

        let max_tx = config.max_translation_ratio * FRAME.width as f64 + 1e-6;
        for update in &path.updates {
            let (tx, ty) = update.translation_part();
            assert!(tx.abs() <= max_tx);
            assert!(ty.abs() <= config.max_translation_ratio * FRAME.height as f64 + 1e-6);
            assert!((update.m[0][0] - 1.0).abs() <= config.max_scale_dev + 1e-6);
            for corner in crop.corners() {
                let p = update.apply(&corner);
                assert!(p.x >= -1e-6 && p.x <= 63.0 + 1e-6);
                assert!(p.y >= -1e-6 && p.y <= 47.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_single_frame() {
        let path = optimizer()
            .optimize(&[first()], FRAME, CropRect::centered(FRAME, 0.8), &ProgressReporter::silent())
            .unwrap();
        assert_eq!(path.updates, vec![AffineTransform::identity()]);
    }

    struct FailingSolver(SolveFailure);

    impl LpSolver for FailingSolver {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn solve(&self, _program: &LinearProgram) -> Result<LpSolution, SolveFailure> {
            Err(self.0)
        }
    }

    #[test]
    fn test_solver_failure_surfaces() {
        let optimizer = PathOptimizer::new(
            PathOptimizerConfig::default(),
            Box::new(FailingSolver(SolveFailure::Unbounded)),
        );
        let observed = vec![first(), available(AffineTransform::identity())];
        let err = optimizer
            .optimize(&observed, FRAME, CropRect::centered(FRAME, 0.8), &ProgressReporter::silent())
            .unwrap_err();
        match err {
            StabError::SolverFailed {
                failure,
                variables,
                constraints,
            } => {
                assert_eq!(failure, SolveFailure::Unbounded);
                assert!(variables > 0);
                assert!(constraints > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_program_size() {
        let motion = vec![AffineTransform::identity(); 5];
        let crop = CropRect::centered(FRAME, 0.8);
        let (lp, params) = optimizer().build_program(&motion, FRAME, crop);
        assert_eq!(params.len(), 4);
        // 4 frames x 16 containment rows + 4 x 2 shear-sum rows, plus two rows per slack
        let slacks = lp.num_vars() - 4 * params::PARAMS_PER_FRAME;
        assert_eq!(lp.num_constraints(), 4 * 16 + 4 * 2 + 2 * slacks);
    }
}
