//! Estimator configuration.
//!
//! Every option has a default, so a configuration file only needs the values it changes.
//! The legacy camelCase parameter names are accepted as aliases.
//!
//! ```
//! use camreg::EstimatorConfig;
//!
//! let config = EstimatorConfig::from_json_str(r#"{ "pnpIterations": 500, "max_pose_height": 2.5 }"#)?;
//! assert_eq!(config.pnp_iterations, 500);
//! assert_eq!(config.max_pose_height, 2.5);
//! # Ok::<(), camreg::ConfigError>(())
//! ```

use std::path::Path;

use camreg_3d::depth::DepthSearchParams;
use camreg_features::{AmbiguityPolicy, FilterParams};
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON or has fields of the wrong type.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of its accepted range.
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        /// Option name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Which correspondences the mean reprojection error is computed over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprojectionScope {
    /// Only the inliers reported by the pose solver.
    #[default]
    Inliers,
    /// Every correspondence handed to the pose solver.
    Correspondences,
}

/// Depth repair search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthRepairConfig {
    /// Radius, in pixels, searched for the nearest nonzero reading.
    #[serde(alias = "depthSearchRadius")]
    pub search_radius_px: f64,
    /// Width, in pixels, of the ring searched beyond the nearest reading.
    #[serde(alias = "depthRingWidth")]
    pub ring_width_px: f64,
}

impl Default for DepthRepairConfig {
    fn default() -> Self {
        let params = DepthSearchParams::default();
        Self {
            search_radius_px: params.search_radius_px,
            ring_width_px: params.ring_width_px,
        }
    }
}

impl DepthRepairConfig {
    /// Search parameters for the depth resolver.
    pub fn params(&self) -> DepthSearchParams {
        DepthSearchParams {
            search_radius_px: self.search_radius_px,
            ring_width_px: self.ring_width_px,
        }
    }
}

/// In-memory feature store settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureMemoryConfig {
    /// Maximum number of stored features, the oldest are evicted first.
    pub capacity: usize,
    /// A new feature replaces stored ones whose keypoint lies within this many pixels.
    pub dedup_radius_px: f32,
    /// A stored feature is culled once the scene reads closer than its depth by more than this.
    pub background_tolerance_mm: u16,
}

impl Default for FeatureMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 2000,
            dedup_radius_px: 2.0,
            background_tolerance_mm: 100,
        }
    }
}

/// Configuration of an [`Estimator`](crate::Estimator), read once at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// RANSAC inlier threshold, pixels.
    #[serde(alias = "pnpReprojectionError")]
    pub pnp_reprojection_error: f64,
    /// RANSAC confidence, in (0, 1).
    #[serde(alias = "pnpConfidence")]
    pub pnp_confidence: f64,
    /// Maximum number of RANSAC hypotheses.
    #[serde(alias = "pnpIterations")]
    pub pnp_iterations: usize,
    /// Seed of the RANSAC sampler, `None` draws one from the OS.
    #[serde(alias = "randomSeed")]
    pub random_seed: Option<u64>,
    /// Maximum Hamming distance of a kept match.
    #[serde(alias = "matchingThreshold")]
    pub matching_threshold: f32,
    /// Pixel radius under which two keypoints are the same point.
    #[serde(alias = "keypointMinDistThreshold")]
    pub keypoint_min_dist_threshold: f32,
    /// Handling of matches that share an origin but disagree on the destination.
    pub ambiguity_policy: AmbiguityPolicy,
    /// Estimates with a larger mean reprojection error are rejected, pixels.
    #[serde(alias = "reprojectionErrorDiscardThreshold")]
    pub reprojection_error_discard_threshold: f64,
    /// Correspondences the mean reprojection error is computed over.
    pub reprojection_scope: ReprojectionScope,
    /// Maximum number of ORB features on the fixed image.
    #[serde(alias = "orbMaxPoints")]
    pub orb_max_points: usize,
    /// Pyramid scale factor of the ORB extractor, greater than 1.
    #[serde(alias = "orbScaleFactor")]
    pub orb_scale_factor: f32,
    /// Number of pyramid levels of the ORB extractor.
    #[serde(alias = "orbLevelsNumber")]
    pub orb_levels_number: usize,
    /// Maximum angle between the device optical axis and the fixed camera one, degrees.
    #[serde(alias = "phoneOrientationDifferenceThreshold_deg")]
    pub phone_orientation_difference_threshold_deg: f64,
    /// Minimum number of matches and of inliers, never below 4.
    #[serde(alias = "minimumMatchesNumber")]
    pub minimum_matches_number: usize,
    /// Fold remembered features into matching and remember validated inliers.
    #[serde(alias = "enableFeaturesMemory")]
    pub enable_features_memory: bool,
    /// Lowest accepted world height of the device, meters.
    #[serde(alias = "minPoseHeight")]
    pub min_pose_height: f64,
    /// Highest accepted world height of the device, meters.
    #[serde(alias = "maxPoseHeight")]
    pub max_pose_height: f64,
    /// Keep per-frame diagnostics for inspection.
    #[serde(alias = "showImages")]
    pub debug_visualization: bool,
    /// Depth repair search.
    pub depth_repair: DepthRepairConfig,
    /// Settings of the built-in feature store.
    pub feature_memory: FeatureMemoryConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            pnp_reprojection_error: 8.0,
            pnp_confidence: 0.99,
            pnp_iterations: 100,
            random_seed: None,
            matching_threshold: 25.0,
            keypoint_min_dist_threshold: 5.0,
            ambiguity_policy: AmbiguityPolicy::DiscardGroup,
            reprojection_error_discard_threshold: 5.0,
            reprojection_scope: ReprojectionScope::Inliers,
            orb_max_points: 500,
            orb_scale_factor: 1.2,
            orb_levels_number: 8,
            phone_orientation_difference_threshold_deg: 45.0,
            minimum_matches_number: 4,
            enable_features_memory: false,
            min_pose_height: -10.0,
            max_pose_height: 10.0,
            debug_visualization: false,
            depth_repair: DepthRepairConfig::default(),
            feature_memory: FeatureMemoryConfig::default(),
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

fn non_negative(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must be finite and non-negative, got {v}")))
    }
}

impl EstimatorConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks every value against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pnp_confidence > 0.0 && self.pnp_confidence < 1.0) {
            return Err(invalid(
                "pnp_confidence",
                format!("must be in (0, 1), got {}", self.pnp_confidence),
            ));
        }
        if self.pnp_iterations == 0 {
            return Err(invalid("pnp_iterations", "must be at least 1"));
        }
        non_negative("pnp_reprojection_error", self.pnp_reprojection_error)?;
        non_negative("matching_threshold", self.matching_threshold as f64)?;
        non_negative("keypoint_min_dist_threshold", self.keypoint_min_dist_threshold as f64)?;
        non_negative(
            "reprojection_error_discard_threshold",
            self.reprojection_error_discard_threshold,
        )?;
        non_negative(
            "phone_orientation_difference_threshold_deg",
            self.phone_orientation_difference_threshold_deg,
        )?;
        if self.orb_max_points == 0 {
            return Err(invalid("orb_max_points", "must be at least 1"));
        }
        if self.orb_scale_factor.is_nan() || self.orb_scale_factor <= 1.0 {
            return Err(invalid(
                "orb_scale_factor",
                format!("must be greater than 1, got {}", self.orb_scale_factor),
            ));
        }
        if self.orb_levels_number == 0 {
            return Err(invalid("orb_levels_number", "must be at least 1"));
        }
        if !(self.min_pose_height.is_finite() && self.max_pose_height.is_finite()) {
            return Err(invalid("min_pose_height", "height bounds must be finite"));
        }
        if self.min_pose_height > self.max_pose_height {
            return Err(invalid(
                "max_pose_height",
                format!(
                    "must not be below min_pose_height ({} < {})",
                    self.max_pose_height, self.min_pose_height
                ),
            ));
        }
        non_negative("depth_repair.search_radius_px", self.depth_repair.search_radius_px)?;
        non_negative("depth_repair.ring_width_px", self.depth_repair.ring_width_px)?;
        if self.feature_memory.capacity == 0 {
            return Err(invalid("feature_memory.capacity", "must be at least 1"));
        }
        non_negative(
            "feature_memory.dedup_radius_px",
            self.feature_memory.dedup_radius_px as f64,
        )?;
        Ok(())
    }

    /// Match filter parameters.
    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            matching_threshold: self.matching_threshold,
            keypoint_min_dist_threshold: self.keypoint_min_dist_threshold,
            policy: self.ambiguity_policy,
        }
    }

    /// Minimum number of matches and inliers an estimate needs.
    pub fn min_matches(&self) -> usize {
        self.minimum_matches_number.max(4)
    }
}
