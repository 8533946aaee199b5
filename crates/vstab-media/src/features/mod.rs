//! Feature detection and optical flow primitives.
//!
//! The tracker only talks to these through the [`FeatureDetector`] and
//! [`OpticalFlow`] traits. The detector variant is chosen once from
//! [`DetectorKind`] when the pipeline is built.

pub mod corners;
pub mod klt;
pub mod pyramid;

pub use corners::{CornerSelection, GoodFeaturesDetector, HarrisDetector};
pub use klt::PyramidalLk;
pub use pyramid::{Plane, Pyramid};

use crate::config::TrackerConfig;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use vstab_models::Point2;

/// Detects trackable keypoints in a grayscale frame.
pub trait FeatureDetector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Keypoints in detection order, strongest first.
    fn detect(&self, image: &GrayImage) -> Vec<Point2>;
}

/// Per-point optical flow output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowResult {
    /// Position of the point in the target image
    pub position: Point2,
    /// Whether tracking succeeded
    pub tracked: bool,
    /// Mean absolute intensity difference over the patch
    pub error: f64,
}

impl FlowResult {
    pub fn lost(position: Point2) -> Self {
        Self {
            position,
            tracked: false,
            error: f64::INFINITY,
        }
    }
}

/// Tracks points from one grayscale frame into another.
pub trait OpticalFlow: Send + Sync {
    /// One result per input point, in input order.
    fn track(&self, from: &GrayImage, to: &GrayImage, points: &[Point2]) -> Vec<FlowResult>;
}

/// Available corner detector variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Shi-Tomasi minimum eigenvalue
    #[default]
    GoodFeatures,
    Harris,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::GoodFeatures => "good_features",
            DetectorKind::Harris => "harris",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = DetectorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good_features" | "shi_tomasi" => Ok(DetectorKind::GoodFeatures),
            "harris" => Ok(DetectorKind::Harris),
            _ => Err(DetectorKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown detector kind: {0}")]
pub struct DetectorKindParseError(String);

/// Build the detector selected by the tracker config.
pub fn create_detector(config: &TrackerConfig) -> Box<dyn FeatureDetector> {
    let selection = CornerSelection {
        max_corners: config.max_corners,
        quality_level: config.quality_level,
        min_distance: config.min_distance,
        block_radius: config.block_radius,
    };
    match config.detector {
        DetectorKind::GoodFeatures => Box::new(GoodFeaturesDetector::new(selection)),
        DetectorKind::Harris => Box::new(HarrisDetector::new(selection, config.harris_k)),
    }
}

/// Build the Lucas-Kanade tracker described by the tracker config.
pub fn create_flow(config: &TrackerConfig) -> Box<dyn OpticalFlow> {
    Box::new(PyramidalLk {
        window_radius: config.window_radius,
        levels: config.pyramid_levels,
        max_iterations: config.max_iterations,
        epsilon: config.epsilon as f32,
        max_error: config.max_error as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_kind_parse() {
        assert_eq!("harris".parse::<DetectorKind>().unwrap(), DetectorKind::Harris);
        assert_eq!("Shi_Tomasi".parse::<DetectorKind>().unwrap(), DetectorKind::GoodFeatures);
        assert!("fast".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn test_create_detector_follows_config() {
        let mut config = TrackerConfig::default();
        assert_eq!(create_detector(&config).name(), "good_features");
        config.detector = DetectorKind::Harris;
        assert_eq!(create_detector(&config).name(), "harris");
    }
}
