//! Tracked feature displacements between consecutive frames.

use crate::geometry::Point2;
use serde::{Deserialize, Serialize};

/// A feature tracked from frame `t` back to frame `t - 1`.
///
/// Displacements are never removed once recorded: the outlier rejector only
/// flips `inlier`, so indices stay stable across stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Displacement {
    /// Feature position in frame `t`
    pub source: Point2,
    /// Tracked position in frame `t - 1`
    pub destination: Point2,
    /// Consistent with the dominant frame motion
    pub inlier: bool,
}

impl Displacement {
    /// Create a new displacement. Starts out flagged as inlier until rejection runs.
    pub fn new(source: Point2, destination: Point2) -> Self {
        Self {
            source,
            destination,
            inlier: true,
        }
    }

    /// Motion vector `destination - source`.
    #[inline]
    pub fn delta(&self) -> Point2 {
        self.source.delta_to(&self.destination)
    }

    /// Length of the motion vector.
    pub fn magnitude(&self) -> f64 {
        self.source.distance(&self.destination)
    }
}
