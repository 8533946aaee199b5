//! Pipeline stage identifiers.
//!
//! Stages run strictly in order; each one is a full batch pass over the
//! video and must finish before the next begins:
//!
//! - `Loading`: read frames from the source
//! - `FeatureDetection`: detect keypoints per frame
//! - `FeatureTracking`: track keypoints from frame t back to t-1
//! - `OutlierRejection`: consensus-based inlier classification
//! - `OriginalMotion`: per-frame affine fit on inliers
//! - `UpdateTransform`: L1 camera path solve
//! - `CropTransform`: crop window extraction
//! - `Saving`: persist the rendered frames

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A stage of the stabilization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    FeatureDetection,
    FeatureTracking,
    OutlierRejection,
    OriginalMotion,
    UpdateTransform,
    CropTransform,
    Saving,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: &'static [Stage] = &[
        Stage::Loading,
        Stage::FeatureDetection,
        Stage::FeatureTracking,
        Stage::OutlierRejection,
        Stage::OriginalMotion,
        Stage::UpdateTransform,
        Stage::CropTransform,
        Stage::Saving,
    ];

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::FeatureDetection => "feature_detection",
            Stage::FeatureTracking => "feature_tracking",
            Stage::OutlierRejection => "outlier_rejection",
            Stage::OriginalMotion => "original_motion",
            Stage::UpdateTransform => "update_transform",
            Stage::CropTransform => "crop_transform",
            Stage::Saving => "saving",
        }
    }

    /// Short tag used as a log prefix.
    pub fn log_tag(&self) -> &'static str {
        match self {
            Stage::Loading => "[LOADING]",
            Stage::FeatureDetection => "[DETECTION]",
            Stage::FeatureTracking => "[TRACKING]",
            Stage::OutlierRejection => "[OUTLIERS]",
            Stage::OriginalMotion => "[MOTION]",
            Stage::UpdateTransform => "[L1_PATH]",
            Stage::CropTransform => "[CROP]",
            Stage::Saving => "[SAVING]",
        }
    }

    /// The stage that must have completed before this one may run.
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Loading => None,
            Stage::FeatureDetection => Some(Stage::Loading),
            Stage::FeatureTracking => Some(Stage::FeatureDetection),
            Stage::OutlierRejection => Some(Stage::FeatureTracking),
            Stage::OriginalMotion => Some(Stage::OutlierRejection),
            Stage::UpdateTransform => Some(Stage::OriginalMotion),
            Stage::CropTransform => Some(Stage::UpdateTransform),
            Stage::Saving => Some(Stage::CropTransform),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == lower)
            .ok_or_else(|| StageParseError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Unknown pipeline stage: {0}")]
pub struct StageParseError(String);
