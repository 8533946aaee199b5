#![deny(unreachable_patterns)]
//! Video stabilization with an L1-optimal camera path.
//!
//! This crate provides:
//! - Frame sources and sinks (in-memory and PNG/JPEG image sequences)
//! - Corner detection and pyramidal Lucas-Kanade tracking
//! - RANSAC outlier rejection and least-squares affine motion fitting
//! - Camera path smoothing as a linear program over corrective transforms
//! - Crop-window rendering, progress reporting and cancellation

pub mod config;
pub mod crop;
pub mod error;
pub mod features;
pub mod motion;
pub mod outlier;
pub mod path;
pub mod pipeline;
pub mod progress;
pub mod ransac;
pub mod sink;
pub mod tracker;
pub mod video;

pub use config::{
    CropConfig, CropPolicy, CropWindow, MotionConfig, PathOptimizerConfig, RejectorConfig,
    StabilizerConfig, TrackerConfig,
};
pub use crop::{CropRenderer, RenderedVideo};
pub use error::{SolveFailure, StabError, StabResult};
pub use features::{create_detector, create_flow, DetectorKind, FeatureDetector, FlowResult, OpticalFlow};
pub use motion::MotionEstimator;
pub use outlier::{ConsensusModel, OutlierRejector};
pub use path::{CameraPath, LpSolver, PathOptimizer, SimplexSolver};
pub use pipeline::{FrameReport, StabilizationReport, Stabilizer};
pub use progress::{CancellationToken, ProgressCallback, ProgressEvent, ProgressReporter};
pub use sink::{FrameSink, ImageSequenceSink, MemorySink};
pub use tracker::FeatureTracker;
pub use video::{Frame, FrameSource, ImageSequenceSource, MemorySource, Video};
