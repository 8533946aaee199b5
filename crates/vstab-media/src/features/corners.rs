//! Structure-tensor corner detectors.
//!
//! Both detectors compute the windowed structure tensor
//!
//! ```text
//! M = | Sxx  Sxy |
//!     | Sxy  Syy |
//! ```
//!
//! from Sobel gradients and differ only in the response:
//! - Good features (Shi-Tomasi): `min(eig(M))`
//! - Harris: `det(M) - k * trace(M)^2`
//!
//! Corners are then picked by the shared selection rules: 3x3 non-maximum
//! suppression, a quality cut relative to the strongest response, a minimum
//! spacing and a corner budget, strongest first.

use super::pyramid::Plane;
use super::FeatureDetector;
use image::GrayImage;
use vstab_models::Point2;

/// Selection rules shared by both detectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerSelection {
    pub max_corners: usize,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_radius: usize,
}

impl Default for CornerSelection {
    fn default() -> Self {
        Self {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 10.0,
            block_radius: 1,
        }
    }
}

struct Tensor {
    sxx: Plane,
    sxy: Plane,
    syy: Plane,
}

fn structure_tensor(image: &GrayImage, radius: usize) -> Tensor {
    let (gx, gy) = Plane::from_gray(image).sobel();
    Tensor {
        sxx: gx.mul(&gx).box_sum(radius),
        sxy: gx.mul(&gy).box_sum(radius),
        syy: gy.mul(&gy).box_sum(radius),
    }
}

fn select(response: &Plane, selection: &CornerSelection) -> Vec<Point2> {
    let width = response.width();
    let height = response.height();
    let border = selection.block_radius + 2;
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let mut max_response = 0.0f32;
    for y in border..height - border {
        for x in border..width - border {
            max_response = max_response.max(response.get(x, y));
        }
    }
    if max_response <= 0.0 {
        return Vec::new();
    }
    let threshold = (selection.quality_level as f32 * max_response).max(f32::MIN_POSITIVE);

    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in border..height - border {
        for x in border..width - border {
            let r = response.get(x, y);
            if r < threshold {
                continue;
            }
            let is_peak = (-1isize..=1).all(|dy| {
                (-1isize..=1).all(|dx| {
                    (dx == 0 && dy == 0)
                        || response.get_clamped(x as isize + dx, y as isize + dy) <= r
                })
            });
            if is_peak {
                candidates.push((r, x, y));
            }
        }
    }

    // strongest first, ties broken in raster order
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then((a.2, a.1).cmp(&(b.2, b.1))));

    let min_dist_sq = selection.min_distance * selection.min_distance;
    let mut corners: Vec<Point2> = Vec::with_capacity(selection.max_corners.min(candidates.len()));
    for (_, x, y) in candidates {
        if corners.len() >= selection.max_corners {
            break;
        }
        let p = Point2::new(x as f64, y as f64);
        let far_enough = corners.iter().all(|c| {
            let dx = c.x - p.x;
            let dy = c.y - p.y;
            dx * dx + dy * dy >= min_dist_sq
        });
        if far_enough {
            corners.push(p);
        }
    }
    corners
}

/// Shi-Tomasi "good features to track".
#[derive(Debug, Clone, Default)]
pub struct GoodFeaturesDetector {
    pub selection: CornerSelection,
}

impl GoodFeaturesDetector {
    pub fn new(selection: CornerSelection) -> Self {
        Self { selection }
    }

    /// Minimum eigenvalue of the structure tensor per pixel.
    pub fn corner_response(&self, image: &GrayImage) -> Plane {
        let tensor = structure_tensor(image, self.selection.block_radius);
        let mut response = Plane::new(tensor.sxx.width(), tensor.sxx.height());
        for y in 0..response.height() {
            for x in 0..response.width() {
                let a = tensor.sxx.get(x, y);
                let b = tensor.sxy.get(x, y);
                let c = tensor.syy.get(x, y);
                let half_diff = 0.5 * (a - c);
                let min_eig = 0.5 * (a + c) - (half_diff * half_diff + b * b).sqrt();
                response.set(x, y, min_eig);
            }
        }
        response
    }
}

impl FeatureDetector for GoodFeaturesDetector {
    fn name(&self) -> &'static str {
        "good_features"
    }

    fn detect(&self, image: &GrayImage) -> Vec<Point2> {
        select(&self.corner_response(image), &self.selection)
    }
}

/// Harris corner detector.
#[derive(Debug, Clone)]
pub struct HarrisDetector {
    pub selection: CornerSelection,
    /// Sensitivity, typically 0.04 to 0.06
    pub k: f64,
}

impl Default for HarrisDetector {
    fn default() -> Self {
        Self {
            selection: CornerSelection::default(),
            k: 0.04,
        }
    }
}

impl HarrisDetector {
    pub fn new(selection: CornerSelection, k: f64) -> Self {
        Self { selection, k }
    }

    pub fn corner_response(&self, image: &GrayImage) -> Plane {
        let tensor = structure_tensor(image, self.selection.block_radius);
        let k = self.k as f32;
        let mut response = Plane::new(tensor.sxx.width(), tensor.sxx.height());
        for y in 0..response.height() {
            for x in 0..response.width() {
                let a = tensor.sxx.get(x, y);
                let b = tensor.sxy.get(x, y);
                let c = tensor.syy.get(x, y);
                let det = a * c - b * b;
                let trace = a + c;
                response.set(x, y, det - k * trace * trace);
            }
        }
        response
    }
}

impl FeatureDetector for HarrisDetector {
    fn name(&self) -> &'static str {
        "harris"
    }

    fn detect(&self, image: &GrayImage) -> Vec<Point2> {
        select(&self.corner_response(image), &self.selection)
    }
}
