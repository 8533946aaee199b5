//! Per-frame observed motion.

use crate::affine::AffineTransform;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a frame has no observed transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// First frame of the video: there is no predecessor.
    NoPredecessor,
    /// Fewer inlier correspondences than an affine fit needs.
    TooFewPoints { available: usize, required: usize },
    /// The inlier point set is rank deficient (e.g. collinear).
    Degenerate,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NoPredecessor => write!(f, "no predecessor frame"),
            UnavailableReason::TooFewPoints { available, required } => {
                write!(f, "{available} inlier points, {required} required")
            }
            UnavailableReason::Degenerate => write!(f, "degenerate point configuration"),
        }
    }
}

/// Observed frame-to-frame motion, mapping frame `t` coordinates into frame `t - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservedMotion {
    /// A fitted transform.
    Available { transform: AffineTransform },
    /// No transform could be estimated; the path optimizer must bridge this frame.
    Unavailable { reason: UnavailableReason },
}

impl ObservedMotion {
    /// The transform, if one was estimated.
    pub fn transform(&self) -> Option<&AffineTransform> {
        match self {
            ObservedMotion::Available { transform } => Some(transform),
            ObservedMotion::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ObservedMotion::Available { .. })
    }
}

impl From<AffineTransform> for ObservedMotion {
    fn from(transform: AffineTransform) -> Self {
        ObservedMotion::Available { transform }
    }
}
