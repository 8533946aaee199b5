//! Reduced affine parameterization of the corrective transforms.
//!
//! Each frame `t >= 1` gets five decision variables
//!
//! ```text
//! B(t) = | s    h_x  t_x |
//!        | h_y  s    t_y |
//! ```
//!
//! Both diagonal terms share `s`, so the corrective transform cannot apply
//! anisotropic scale. `B(0)` is the identity constant.

use super::lp::{LinearExpr, LinearProgram, LpSolution, Var};
use vstab_models::AffineTransform;

/// Decision variables per frame.
pub const PARAMS_PER_FRAME: usize = 5;

/// Row-major component indices that hold translation.
const TRANSLATION_COMPONENTS: [usize; 2] = [2, 5];

/// True for the translation entries of a row-major 2x3 matrix.
pub fn is_translation_component(index: usize) -> bool {
    TRANSLATION_COMPONENTS.contains(&index)
}

/// Variables of one frame's corrective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub scale: Var,
    pub shear_x: Var,
    pub shear_y: Var,
    pub tx: Var,
    pub ty: Var,
}

/// Bounds applied to every frame's parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub scale: (f64, f64),
    pub shear: f64,
    pub tx: f64,
    pub ty: f64,
}

impl FrameParams {
    /// Register the five variables with zero cost.
    pub fn register(lp: &mut LinearProgram, bounds: &ParamBounds) -> Self {
        Self {
            scale: lp.add_var(0.0, bounds.scale),
            shear_x: lp.add_var(0.0, (-bounds.shear, bounds.shear)),
            shear_y: lp.add_var(0.0, (-bounds.shear, bounds.shear)),
            tx: lp.add_var(0.0, (-bounds.tx, bounds.tx)),
            ty: lp.add_var(0.0, (-bounds.ty, bounds.ty)),
        }
    }

    /// `(variable, identity value, is_translation)` for each parameter.
    pub fn with_identity(&self) -> [(Var, f64, bool); PARAMS_PER_FRAME] {
        [
            (self.scale, 1.0, false),
            (self.shear_x, 0.0, false),
            (self.shear_y, 0.0, false),
            (self.tx, 0.0, true),
            (self.ty, 0.0, true),
        ]
    }

    /// Read the solved transform back.
    pub fn extract(&self, solution: &LpSolution) -> AffineTransform {
        let s = solution.value(self.scale);
        AffineTransform::new(
            s,
            solution.value(self.shear_x),
            solution.value(self.tx),
            solution.value(self.shear_y),
            s,
            solution.value(self.ty),
        )
    }
}

/// A 2x3 matrix whose entries are linear in the decision variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineExpr {
    pub m: [[LinearExpr; 3]; 2],
}

impl AffineExpr {
    pub fn constant(t: &AffineTransform) -> Self {
        Self {
            m: std::array::from_fn(|r| std::array::from_fn(|c| LinearExpr::constant(t.m[r][c]))),
        }
    }

    pub fn identity() -> Self {
        Self::constant(&AffineTransform::identity())
    }

    pub fn from_params(p: &FrameParams) -> Self {
        Self {
            m: [
                [LinearExpr::var(p.scale), LinearExpr::var(p.shear_x), LinearExpr::var(p.tx)],
                [LinearExpr::var(p.shear_y), LinearExpr::var(p.scale), LinearExpr::var(p.ty)],
            ],
        }
    }

    /// The constant transform `f` composed after this one: `f * self` in
    /// homogeneous coordinates.
    pub fn premultiply(&self, f: &AffineTransform) -> Self {
        let m = std::array::from_fn(|r| {
            std::array::from_fn(|c| {
                let mut entry = LinearExpr::zero();
                entry.add_scaled(&self.m[0][c], f.m[r][0]);
                entry.add_scaled(&self.m[1][c], f.m[r][1]);
                if c == 2 {
                    entry.add_constant(f.m[r][2]);
                }
                entry
            })
        });
        Self { m }
    }

    /// `self + scale * other`, entry by entry.
    pub fn plus_scaled(&self, other: &AffineExpr, scale: f64) -> Self {
        let mut out = self.clone();
        for r in 0..2 {
            for c in 0..3 {
                out.m[r][c].add_scaled(&other.m[r][c], scale);
            }
        }
        out
    }

    pub fn minus(&self, other: &AffineExpr) -> Self {
        self.plus_scaled(other, -1.0)
    }

    /// Entries in row-major order.
    pub fn components(&self) -> impl Iterator<Item = (usize, &LinearExpr)> {
        self.m.iter().flatten().enumerate()
    }

    /// `(x', y')` expressions of the point `(x, y)` under this transform.
    pub fn apply(&self, x: f64, y: f64) -> (LinearExpr, LinearExpr) {
        let row = |r: usize| {
            let mut e = self.m[r][2].clone();
            e.add_scaled(&self.m[r][0], x);
            e.add_scaled(&self.m[r][1], y);
            e
        };
        (row(0), row(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn frame_with_values(values: [f64; 5]) -> (FrameParams, Vec<f64>) {
        let mut lp = LinearProgram::new();
        let bounds = ParamBounds {
            scale: (0.0, 2.0),
            shear: 1.0,
            tx: 100.0,
            ty: 100.0,
        };
        let params = FrameParams::register(&mut lp, &bounds);
        (params, values.to_vec())
    }

    #[test]
    fn test_premultiply_matches_compose() {
        let (params, values) = frame_with_values([1.05, 0.02, -0.01, 3.0, -4.0]);
        let b = AffineTransform::new(1.05, 0.02, 3.0, -0.01, 1.05, -4.0);
        let f = AffineTransform::new(0.99, 0.01, 5.0, 0.02, 1.01, -1.5);

        let expr = AffineExpr::from_params(&params).premultiply(&f);
        let expected = f.compose(&b).to_array();
        for (i, entry) in expr.components() {
            assert_abs_diff_eq!(entry.evaluate(&values), expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_apply_point() {
        let (params, values) = frame_with_values([0.9, 0.1, 0.0, 2.0, 1.0]);
        let (x, y) = AffineExpr::from_params(&params).apply(10.0, 20.0);
        assert_abs_diff_eq!(x.evaluate(&values), 0.9 * 10.0 + 0.1 * 20.0 + 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y.evaluate(&values), 0.9 * 20.0 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_identity_minus_itself_is_zero() {
        let id = AffineExpr::identity();
        for (_, entry) in id.minus(&id).components() {
            assert!(entry.is_constant());
            assert_eq!(entry.constant_part(), 0.0);
        }
        assert!(is_translation_component(2));
        assert!(!is_translation_component(4));
    }
}
