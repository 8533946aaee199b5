//! Pyramidal Lucas-Kanade optical flow.
//!
//! Forward additive formulation: gradients are evaluated at the warped
//! position in the target image every iteration, so the 2x2 normal matrix
//! is rebuilt per iteration. Tracking runs coarse to fine, doubling the
//! displacement estimate between levels.

use super::pyramid::{Plane, Pyramid};
use super::{FlowResult, OpticalFlow};
use image::GrayImage;
use vstab_models::Point2;

/// Outcome of the iteration at one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LkStep {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

/// Pyramidal Lucas-Kanade tracker.
#[derive(Debug, Clone)]
pub struct PyramidalLk {
    /// Patch half-size; the patch is `(2r+1)^2` pixels
    pub window_radius: usize,
    pub levels: usize,
    pub max_iterations: usize,
    /// Stop when the update is shorter than this many pixels
    pub epsilon: f32,
    /// Mean absolute patch error above which a track counts as failed
    pub max_error: f32,
}

impl Default for PyramidalLk {
    fn default() -> Self {
        Self {
            window_radius: 7,
            levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            max_error: 30.0,
        }
    }
}

impl PyramidalLk {
    fn track_point(&self, from: &Pyramid, to: &Pyramid, point: &Point2, levels: usize) -> FlowResult {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;
        let px = point.x as f32;
        let py = point.y as f32;

        for level in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let step = self.iterate(
                &from.levels[level],
                &to.levels[level],
                px * scale,
                py * scale,
                dx,
                dy,
            );
            match step {
                LkStep::Converged(ndx, ndy) | LkStep::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkStep::Singular => {
                    return FlowResult::lost(Point2::new(
                        point.x + (dx / scale) as f64,
                        point.y + (dy / scale) as f64,
                    ));
                }
            }
            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let base_from = &from.levels[0];
        let base_to = &to.levels[0];
        let nx = px + dx;
        let ny = py + dy;
        let position = Point2::new(nx as f64, ny as f64);
        let in_bounds = nx >= 0.0
            && ny >= 0.0
            && nx <= (base_to.width() - 1) as f32
            && ny <= (base_to.height() - 1) as f32;
        if !in_bounds || !nx.is_finite() || !ny.is_finite() {
            return FlowResult::lost(position);
        }

        let error = self.patch_error(base_from, base_to, px, py, dx, dy);
        FlowResult {
            position,
            tracked: error <= self.max_error,
            error: error as f64,
        }
    }

    fn iterate(
        &self,
        from: &Plane,
        to: &Plane,
        fx: f32,
        fy: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LkStep {
        let r = self.window_radius as isize;
        for _ in 0..self.max_iterations {
            let mut h00 = 0.0f32;
            let mut h01 = 0.0f32;
            let mut h11 = 0.0f32;
            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;

            for oy in -r..=r {
                for ox in -r..=r {
                    let ox = ox as f32;
                    let oy = oy as f32;
                    let template = from.sample(fx + ox, fy + oy);
                    let wx = fx + dx + ox;
                    let wy = fy + dy + oy;
                    let warped = to.sample(wx, wy);
                    let e = template - warped;

                    let gx = 0.5 * (to.sample(wx + 1.0, wy) - to.sample(wx - 1.0, wy));
                    let gy = 0.5 * (to.sample(wx, wy + 1.0) - to.sample(wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LkStep::Singular;
            }
            let inv_det = 1.0 / det;
            let step_x = inv_det * (h11 * b0 - h01 * b1);
            let step_y = inv_det * (h00 * b1 - h01 * b0);
            dx += step_x;
            dy += step_y;

            if step_x * step_x + step_y * step_y < self.epsilon * self.epsilon {
                return LkStep::Converged(dx, dy);
            }
        }
        LkStep::MaxIter(dx, dy)
    }

    fn patch_error(&self, from: &Plane, to: &Plane, fx: f32, fy: f32, dx: f32, dy: f32) -> f32 {
        let r = self.window_radius as isize;
        let mut total = 0.0f32;
        let mut count = 0usize;
        for oy in -r..=r {
            for ox in -r..=r {
                let ox = ox as f32;
                let oy = oy as f32;
                let template = from.sample(fx + ox, fy + oy);
                let warped = to.sample(fx + dx + ox, fy + dy + oy);
                total += (template - warped).abs();
                count += 1;
            }
        }
        total / count as f32
    }
}

impl OpticalFlow for PyramidalLk {
    fn track(&self, from: &GrayImage, to: &GrayImage, points: &[Point2]) -> Vec<FlowResult> {
        if points.is_empty() {
            return Vec::new();
        }
        let from_pyr = Pyramid::build(from, self.levels);
        let to_pyr = Pyramid::build(to, self.levels);
        let levels = self
            .levels
            .min(from_pyr.num_levels())
            .min(to_pyr.num_levels())
            .max(1);
        points
            .iter()
            .map(|p| self.track_point(&from_pyr, &to_pyr, p, levels))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn texture(shift_x: f64, shift_y: f64) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            let x = x as f64 - shift_x;
            let y = y as f64 - shift_y;
            let v = 128.0 + 50.0 * (x / 5.0).sin() * (y / 7.0).cos() + 30.0 * ((x + y) / 9.0).sin();
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_tracks_subpixel_shift() {
        let from = texture(0.0, 0.0);
        let to = texture(2.5, -1.5);
        let points = vec![Point2::new(40.0, 40.0), Point2::new(55.0, 48.0), Point2::new(30.0, 60.0)];

        let results = PyramidalLk::default().track(&from, &to, &points);
        assert_eq!(results.len(), points.len());
        for (p, r) in points.iter().zip(&results) {
            assert!(r.tracked, "point {p:?} lost: {r:?}");
            assert!((r.position.x - (p.x + 2.5)).abs() < 0.2, "{r:?}");
            assert!((r.position.y - (p.y - 1.5)).abs() < 0.2, "{r:?}");
            assert!(r.error < 5.0);
        }
    }

    #[test]
    fn test_flat_patch_is_lost() {
        let flat = GrayImage::from_pixel(64, 64, Luma([100]));
        let results = PyramidalLk::default().track(&flat, &flat, &[Point2::new(32.0, 32.0)]);
        assert_eq!(results.len(), 1);
        assert!(!results[0].tracked);
    }

    #[test]
    fn test_no_points() {
        let img = texture(0.0, 0.0);
        assert!(PyramidalLk::default().track(&img, &img, &[]).is_empty());
    }
}
