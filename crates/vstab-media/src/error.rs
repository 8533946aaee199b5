//! Error types for stabilization operations.

use std::path::PathBuf;
use thiserror::Error;
use vstab_models::{CropRect, FrameSize, Stage};

/// Result type for stabilization operations.
pub type StabResult<T> = Result<T, StabError>;

/// How the linear program failed to produce a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    /// No point satisfies every constraint.
    Infeasible,
    /// The objective decreases without bound.
    Unbounded,
}

impl std::fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveFailure::Infeasible => write!(f, "infeasible"),
            SolveFailure::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Errors that can abort a stabilization run.
///
/// Per-frame shortfalls (no features, too few inliers) are not errors; they
/// are recorded on the frame and only surface here when they cannot be
/// bridged.
#[derive(Debug, Error)]
pub enum StabError {
    #[error("Input unavailable: {reason}")]
    InputUnavailable { reason: String },

    #[error("Insufficient data in {stage}{}: {reason}", frame_suffix(.frame))]
    InsufficientData {
        stage: Stage,
        frame: Option<usize>,
        reason: String,
    },

    #[error("Path optimization failed: linear program is {failure} ({variables} variables, {constraints} constraints)")]
    SolverFailed {
        failure: SolveFailure,
        variables: usize,
        constraints: usize,
    },

    #[error("Output unavailable at {}: {reason}", .path.display())]
    OutputUnavailable { path: PathBuf, reason: String },

    #[error("Crop window {window:?} does not fit frame {frame:?}")]
    InvalidCropWindow { window: CropRect, frame: FrameSize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage {stage} requires {required} to complete first")]
    StageOrder { stage: Stage, required: Stage },

    #[error("Operation cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

fn frame_suffix(frame: &Option<usize>) -> String {
    match frame {
        Some(idx) => format!(" at frame {idx}"),
        None => String::new(),
    }
}

impl StabError {
    /// Create an input unavailable error.
    pub fn input_unavailable(reason: impl Into<String>) -> Self {
        Self::InputUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an insufficient data error.
    pub fn insufficient_data(stage: Stage, frame: Option<usize>, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            stage,
            frame,
            reason: reason.into(),
        }
    }

    /// Create an output unavailable error.
    pub fn output_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OutputUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Stage the failure is attributed to, when known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StabError::InputUnavailable { .. } => Some(Stage::Loading),
            StabError::InsufficientData { stage, .. } => Some(*stage),
            StabError::SolverFailed { .. } => Some(Stage::UpdateTransform),
            StabError::OutputUnavailable { .. } => Some(Stage::Saving),
            StabError::InvalidCropWindow { .. } => Some(Stage::CropTransform),
            StabError::StageOrder { stage, .. } => Some(*stage),
            StabError::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    /// True for failures that indicate a broken problem construction rather than bad input.
    pub fn is_solver_failure(&self) -> bool {
        matches!(self, StabError::SolverFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = StabError::insufficient_data(Stage::UpdateTransform, Some(7), "gap of 12 frames");
        assert_eq!(
            err.to_string(),
            "Insufficient data in update_transform at frame 7: gap of 12 frames"
        );
        assert_eq!(err.stage(), Some(Stage::UpdateTransform));

        let err = StabError::insufficient_data(Stage::OriginalMotion, None, "no motion");
        assert_eq!(err.to_string(), "Insufficient data in original_motion: no motion");
    }

    #[test]
    fn test_solver_failure_is_distinct() {
        let err = StabError::SolverFailed {
            failure: SolveFailure::Infeasible,
            variables: 10,
            constraints: 20,
        };
        assert!(err.is_solver_failure());
        assert!(err.to_string().contains("infeasible"));
        assert!(!StabError::input_unavailable("x").is_solver_failure());
    }
}
