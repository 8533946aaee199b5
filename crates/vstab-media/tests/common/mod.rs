//! Scripted primitives and synthetic clips shared by the integration tests.
//!
//! Every frame carries its index in pixel (0, 0), so the doubles can tell
//! which frame they were handed.

#![allow(dead_code)]

use image::{GrayImage, Rgb, RgbImage};
use std::collections::HashSet;
use vstab_media::{FeatureDetector, FlowResult, MemorySource, OpticalFlow, StabilizerConfig};
use vstab_models::{AffineTransform, Point2};

pub const WIDTH: u32 = 120;
pub const HEIGHT: u32 = 90;

/// Frame index stored in the marker pixel.
pub fn marker(image: &GrayImage) -> usize {
    image.get_pixel(0, 0)[0] as usize
}

/// Frames of a flat clip, each carrying its index as marker.
pub fn marked_frames(count: usize) -> Vec<RgbImage> {
    (0..count)
        .map(|t| {
            let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([100, 100, 100]));
            let m = t as u8;
            img.put_pixel(0, 0, Rgb([m, m, m]));
            img
        })
        .collect()
}

pub fn marked_source(count: usize) -> MemorySource {
    MemorySource::new(marked_frames(count), 30.0)
}

/// Deterministic config with the pipeline's default weights.
pub fn seeded_config() -> StabilizerConfig {
    StabilizerConfig {
        seed: Some(42),
        ..StabilizerConfig::default()
    }
}

/// Returns a fixed 5x4 grid, except on frames listed as blank.
#[derive(Default)]
pub struct GridDetector {
    pub blank: HashSet<usize>,
}

impl GridDetector {
    pub fn grid() -> Vec<Point2> {
        let mut points = Vec::new();
        for gy in 0..4 {
            for gx in 0..5 {
                points.push(Point2::new(20.0 + 20.0 * gx as f64, 15.0 + 20.0 * gy as f64));
            }
        }
        points
    }

    pub fn with_blank(frames: &[usize]) -> Self {
        Self {
            blank: frames.iter().copied().collect(),
        }
    }
}

impl FeatureDetector for GridDetector {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn detect(&self, image: &GrayImage) -> Vec<Point2> {
        if self.blank.contains(&marker(image)) {
            Vec::new()
        } else {
            Self::grid()
        }
    }
}

/// Moves points of frame `t` by `motions[t]`; optionally corrupts every
/// fifth point.
pub struct ScriptedFlow {
    pub motions: Vec<AffineTransform>,
    pub corrupt: bool,
}

impl ScriptedFlow {
    pub fn new(motions: Vec<AffineTransform>) -> Self {
        Self {
            motions,
            corrupt: false,
        }
    }

    pub fn with_outliers(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Pure translations `dx[t]` along x.
    pub fn horizontal(dx: &[f64]) -> Self {
        Self::new(dx.iter().map(|&d| AffineTransform::translation(d, 0.0)).collect())
    }
}

impl OpticalFlow for ScriptedFlow {
    fn track(&self, from: &GrayImage, _to: &GrayImage, points: &[Point2]) -> Vec<FlowResult> {
        let motion = self
            .motions
            .get(marker(from))
            .copied()
            .unwrap_or_default();
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut position = motion.apply(p);
                if self.corrupt && i % 5 == 0 {
                    position = Point2::new(position.x + 15.0, position.y - 12.0);
                }
                FlowResult {
                    position,
                    tracked: true,
                    error: 0.0,
                }
            })
            .collect()
    }
}
