//! 2×3 affine transforms.
//!
//! A transform maps `(x, y)` to
//! `(m00·x + m01·y + m02, m10·x + m11·y + m12)`. Each frame carries two of
//! them: the observed motion relative to its predecessor and the corrective
//! update computed by the path optimizer.

use crate::geometry::Point2;
use serde::{Deserialize, Serialize};

/// 2D affine transform stored as the top two rows of a 3×3 homogeneous matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    /// Row-major matrix rows.
    pub m: [[f64; 3]; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    /// Create from the six matrix entries, row by row.
    pub fn new(m00: f64, m01: f64, m02: f64, m10: f64, m11: f64, m12: f64) -> Self {
        Self {
            m: [[m00, m01, m02], [m10, m11, m12]],
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Pure translation.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, tx, 0.0, 1.0, ty)
    }

    /// Rotation by `angle` radians about the origin, scaled by `scale`, then translated.
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(scale * c, -scale * s, tx, scale * s, scale * c, ty)
    }

    /// Entries in row-major order `[m00, m01, m02, m10, m11, m12]`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.m[0][0],
            self.m[0][1],
            self.m[0][2],
            self.m[1][0],
            self.m[1][1],
            self.m[1][2],
        ]
    }

    /// Build from row-major entries.
    pub fn from_array(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    /// Translation component `(m02, m12)`.
    #[inline]
    pub fn translation_part(&self) -> (f64, f64) {
        (self.m[0][2], self.m[1][2])
    }

    /// Map a point.
    #[inline]
    pub fn apply(&self, p: &Point2) -> Point2 {
        Point2::new(
            self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2],
            self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2],
        )
    }

    /// Composition `self ∘ other`: the result applies `other` first.
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        let a = &self.m;
        let b = &other.m;
        AffineTransform::new(
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
            a[0][0] * b[0][2] + a[0][1] * b[1][2] + a[0][2],
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
            a[1][0] * b[0][2] + a[1][1] * b[1][2] + a[1][2],
        )
    }

    /// Determinant of the linear part.
    #[inline]
    pub fn determinant(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    /// Inverse transform, or `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.m[1][1] * inv_det;
        let b = -self.m[0][1] * inv_det;
        let c = -self.m[1][0] * inv_det;
        let d = self.m[0][0] * inv_det;
        let (tx, ty) = self.translation_part();
        Some(AffineTransform::new(
            a,
            b,
            -(a * tx + b * ty),
            c,
            d,
            -(c * tx + d * ty),
        ))
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Largest absolute entry-wise difference to another transform.
    pub fn max_abs_diff(&self, other: &AffineTransform) -> f64 {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_apply_translation() {
        let t = AffineTransform::translation(5.0, -2.0);
        let p = t.apply(&Point2::new(1.0, 1.0));
        assert_relative_eq!(p.x, 6.0);
        assert_relative_eq!(p.y, -1.0);
    }

    #[test]
    fn test_compose_order() {
        // Scale then translate: translate ∘ scale
        let scale = AffineTransform::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0);
        let shift = AffineTransform::translation(1.0, 0.0);
        let p = shift.compose(&scale).apply(&Point2::new(3.0, 0.0));
        assert_relative_eq!(p.x, 7.0);
        let q = scale.compose(&shift).apply(&Point2::new(3.0, 0.0));
        assert_relative_eq!(q.x, 8.0);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = AffineTransform::similarity(1.1, 0.2, 4.0, -3.0);
        let inv = t.inverse().unwrap();
        let id = t.compose(&inv);
        assert!(id.max_abs_diff(&AffineTransform::identity()) < 1e-12);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = AffineTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&AffineTransform::identity()).unwrap();
        assert_eq!(json, r#"{"m":[[1.0,0.0,0.0],[0.0,1.0,0.0]]}"#);
    }
}
