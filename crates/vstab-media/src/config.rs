//! Configuration for the stabilization pipeline.
//!
//! Every stage config derives `Default` and is `#[serde(default)]`, so a JSON
//! file only needs to name the values it changes.

use crate::error::{StabError, StabResult};
use crate::features::DetectorKind;
use crate::outlier::ConsensusModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vstab_models::CropRect;

/// Feature detection and tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Corner detector variant (default: good features)
    pub detector: DetectorKind,

    /// Maximum corners kept per frame (default: 200)
    pub max_corners: usize,

    /// Minimum response relative to the strongest corner (default: 0.01)
    pub quality_level: f64,

    /// Minimum distance between kept corners in pixels (default: 10.0)
    pub min_distance: f64,

    /// Half-size of the structure tensor window (default: 1 → 3x3)
    pub block_radius: usize,

    /// Harris sensitivity, only used by the Harris detector (default: 0.04)
    pub harris_k: f64,

    /// Lucas-Kanade patch half-size (default: 7 → 15x15)
    pub window_radius: usize,

    /// Pyramid levels used for coarse-to-fine tracking (default: 3)
    pub pyramid_levels: usize,

    /// Gauss-Newton iterations per pyramid level (default: 30)
    pub max_iterations: usize,

    /// Convergence threshold in pixels (default: 0.01)
    pub epsilon: f64,

    /// Tracks with a mean absolute patch error above this are dropped (default: 30.0)
    pub max_error: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 10.0,
            block_radius: 1,
            harris_k: 0.04,
            window_radius: 7,
            pyramid_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            max_error: 30.0,
        }
    }
}

/// Consensus-based outlier rejection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectorConfig {
    /// Model fitted to each minimal sample (default: affine)
    pub model: ConsensusModel,

    /// Reprojection error tolerance in pixels (default: 2.0)
    pub threshold: f64,

    /// Hard cap on sampling iterations per frame (default: 500)
    pub max_iterations: usize,

    /// Probability of drawing at least one clean sample (default: 0.99)
    pub confidence: f64,
}

impl Default for RejectorConfig {
    fn default() -> Self {
        Self {
            model: ConsensusModel::default(),
            threshold: 2.0,
            max_iterations: 500,
            confidence: 0.99,
        }
    }
}

/// Least-squares motion estimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Minimum inlier pairs for an affine fit (default: 3, never lower)
    pub min_points: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self { min_points: 3 }
    }
}

/// L1 camera path optimization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptimizerConfig {
    /// Weight for staying close to the identity correction (default: 1.0)
    pub lambda_position: f64,

    /// Weight for velocity smoothness, first derivative (default: 1.0)
    pub lambda_velocity: f64,

    /// Weight for acceleration smoothness, second derivative (default: 10.0)
    pub lambda_acceleration: f64,

    /// Weight for jerk smoothness, third derivative (default: 100.0)
    pub lambda_jerk: f64,

    /// Multiplier for scale/shear components relative to translation (default: 100.0)
    pub linear_weight: f64,

    /// Maximum deviation of the corrective scale from 1 (default: 0.1)
    pub max_scale_dev: f64,

    /// Maximum absolute shear term (default: 0.1)
    pub max_shear: f64,

    /// Maximum absolute sum of both shear terms (default: 0.05)
    pub max_shear_sum: f64,

    /// Corrective translation bound as a fraction of the frame size (default: 0.2)
    pub max_translation_ratio: f64,

    /// Longest run of frames without observed motion that may be bridged (default: 10)
    pub max_gap_frames: usize,
}

impl Default for PathOptimizerConfig {
    fn default() -> Self {
        Self {
            lambda_position: 1.0,
            lambda_velocity: 1.0,
            lambda_acceleration: 10.0,
            lambda_jerk: 100.0,
            linear_weight: 100.0,
            max_scale_dev: 0.1,
            max_shear: 0.1,
            max_shear_sum: 0.05,
            max_translation_ratio: 0.2,
            max_gap_frames: 10,
        }
    }
}

/// How the crop window is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CropWindow {
    /// Centred window covering `ratio` of each frame dimension
    Centered { ratio: f64 },
    /// Caller-supplied rectangle
    Explicit(CropRect),
    /// Largest centred window containable under every corrective transform.
    /// The path is optimized with the `min_ratio` window.
    Largest { min_ratio: f64 },
}

impl Default for CropWindow {
    fn default() -> Self {
        Self::Centered { ratio: 0.8 }
    }
}

/// How the crop window is placed in each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropPolicy {
    /// The same rectangle is cut from every frame
    #[default]
    Static,
    /// The rectangle is shifted by the corrective translation
    Translate,
    /// Output pixels are sampled through the full corrective transform
    Warp,
}

/// Crop window and render settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    pub window: CropWindow,
    pub policy: CropPolicy,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub tracker: TrackerConfig,
    pub rejector: RejectorConfig,
    pub motion: MotionConfig,
    pub path: PathOptimizerConfig,
    pub crop: CropConfig,

    /// Process independent frames on the rayon pool (default: true)
    pub parallel: bool,

    /// Seed for outlier sampling. `None` draws a fresh seed per run.
    pub seed: Option<u64>,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            rejector: RejectorConfig::default(),
            motion: MotionConfig::default(),
            path: PathOptimizerConfig::default(),
            crop: CropConfig::default(),
            parallel: true,
            seed: None,
        }
    }
}

impl StabilizerConfig {
    /// Load a (possibly partial) config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> StabResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `VSTAB_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = std::env::var("VSTAB_SEED").ok().and_then(|s| s.parse().ok()) {
            self.seed = Some(seed);
        }
        self.parallel = std::env::var("VSTAB_PARALLEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.parallel);
        if let Some(ratio) = std::env::var("VSTAB_CROP_RATIO")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.crop.window = CropWindow::Centered { ratio };
        }
        self.path.max_gap_frames = std::env::var("VSTAB_MAX_GAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.path.max_gap_frames);
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> StabResult<()> {
        let t = &self.tracker;
        if t.max_corners == 0 {
            return Err(StabError::invalid_config("tracker.max_corners must be positive"));
        }
        if !(t.quality_level > 0.0 && t.quality_level <= 1.0) {
            return Err(StabError::invalid_config(
                "tracker.quality_level must be in (0, 1]",
            ));
        }
        if !(t.min_distance >= 0.0) {
            return Err(StabError::invalid_config("tracker.min_distance must be >= 0"));
        }
        if t.block_radius == 0 || t.window_radius == 0 {
            return Err(StabError::invalid_config(
                "tracker.block_radius and tracker.window_radius must be positive",
            ));
        }
        if t.pyramid_levels == 0 || t.max_iterations == 0 {
            return Err(StabError::invalid_config(
                "tracker.pyramid_levels and tracker.max_iterations must be positive",
            ));
        }
        if !(t.epsilon > 0.0) || !(t.max_error > 0.0) {
            return Err(StabError::invalid_config(
                "tracker.epsilon and tracker.max_error must be positive",
            ));
        }

        let r = &self.rejector;
        if !(r.threshold > 0.0 && r.threshold.is_finite()) {
            return Err(StabError::invalid_config("rejector.threshold must be positive"));
        }
        if r.max_iterations == 0 {
            return Err(StabError::invalid_config(
                "rejector.max_iterations must be positive",
            ));
        }
        if !(r.confidence > 0.0 && r.confidence < 1.0) {
            return Err(StabError::invalid_config("rejector.confidence must be in (0, 1)"));
        }

        if self.motion.min_points < 3 {
            return Err(StabError::invalid_config(format!(
                "motion.min_points must be at least 3, got {}",
                self.motion.min_points
            )));
        }

        let p = &self.path;
        let weights = [
            p.lambda_position,
            p.lambda_velocity,
            p.lambda_acceleration,
            p.lambda_jerk,
        ];
        if weights.iter().any(|w| !(*w >= 0.0 && w.is_finite())) {
            return Err(StabError::invalid_config(
                "path weights must be finite and non-negative",
            ));
        }
        if !(p.linear_weight > 0.0 && p.linear_weight.is_finite()) {
            return Err(StabError::invalid_config("path.linear_weight must be positive"));
        }
        if !(p.max_scale_dev >= 0.0 && p.max_scale_dev < 1.0) {
            return Err(StabError::invalid_config("path.max_scale_dev must be in [0, 1)"));
        }
        if !(p.max_shear >= 0.0) || !(p.max_shear_sum >= 0.0) {
            return Err(StabError::invalid_config("path shear bounds must be >= 0"));
        }
        if !(p.max_translation_ratio >= 0.0 && p.max_translation_ratio.is_finite()) {
            return Err(StabError::invalid_config(
                "path.max_translation_ratio must be >= 0",
            ));
        }

        match self.crop.window {
            CropWindow::Centered { ratio } if !(ratio > 0.0 && ratio <= 1.0) => Err(
                StabError::invalid_config(format!("crop ratio must be in (0, 1], got {ratio}")),
            ),
            CropWindow::Largest { min_ratio } if !(min_ratio > 0.0 && min_ratio <= 1.0) => {
                Err(StabError::invalid_config(format!(
                    "crop min_ratio must be in (0, 1], got {min_ratio}"
                )))
            }
            CropWindow::Explicit(rect) if rect.is_empty() => Err(StabError::invalid_config(
                "explicit crop window must be non-empty",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        StabilizerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "seed": 7,
            "path": { "lambda_jerk": 50.0 },
            "crop": { "window": { "mode": "largest", "min_ratio": 0.7 }, "policy": "warp" }
        }"#;
        let config: StabilizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.path.lambda_jerk, 50.0);
        assert_eq!(config.path.lambda_acceleration, 10.0);
        assert_eq!(config.crop.window, CropWindow::Largest { min_ratio: 0.7 });
        assert_eq!(config.crop.policy, CropPolicy::Warp);
        assert!(config.parallel);
    }

    #[test]
    fn test_explicit_window_json() {
        let json = r#"{ "window": { "mode": "explicit", "x": 4, "y": 2, "width": 32, "height": 24 } }"#;
        let crop: CropConfig = serde_json::from_str(json).unwrap();
        assert_eq!(crop.window, CropWindow::Explicit(CropRect::new(4, 2, 32, 24)));
        assert_eq!(crop.policy, CropPolicy::Static);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StabilizerConfig::default();
        config.motion.min_points = 2;
        assert!(matches!(config.validate(), Err(StabError::InvalidConfig(_))));

        let mut config = StabilizerConfig::default();
        config.crop.window = CropWindow::Centered { ratio: 1.5 };
        assert!(config.validate().is_err());

        let mut config = StabilizerConfig::default();
        config.rejector.confidence = 1.0;
        assert!(config.validate().is_err());

        let mut config = StabilizerConfig::default();
        config.path.lambda_velocity = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "parallel": false, "motion": { "min_points": 4 } }"#).unwrap();
        let config = StabilizerConfig::from_json_file(&path).unwrap();
        assert!(!config.parallel);
        assert_eq!(config.motion.min_points, 4);

        assert!(StabilizerConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
