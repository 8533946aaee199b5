//! Shared data models for the vstab video stabilizer.
//!
//! This crate provides Serde-serializable types for:
//! - 2D points, frame sizes and crop rectangles
//! - Affine transforms (observed motion and corrective updates)
//! - Tracked displacements between consecutive frames
//! - Pipeline stage identifiers used for progress and error context

pub mod affine;
pub mod displacement;
pub mod geometry;
pub mod motion;
pub mod stage;

// Re-export common types
pub use affine::AffineTransform;
pub use displacement::Displacement;
pub use geometry::{CropRect, FrameSize, Point2};
pub use motion::{ObservedMotion, UnavailableReason};
pub use stage::{Stage, StageParseError};
