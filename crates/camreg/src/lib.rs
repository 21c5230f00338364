#![deny(missing_docs)]
//! Pose registration of AR devices against a fixed RGB-D camera.
//!
//! An [`Estimator`] tracks one device. For every [`Frame`] it matches the device features
//! against the fixed camera features, repairs missing depth around the matched pixels,
//! back-projects them into the fixed camera frame and solves PnP with RANSAC, warm started
//! from the last accepted pose. A pose is accepted only if it passes, in order, the match
//! count, inlier count, reprojection error, height and orientation gates.
//!
//! Status codes follow [`outcome_code`]: `0` accepted, `1..=6` for a [`Rejection`] and
//! negative values for an [`EstimatorError`].

/// Estimator configuration.
pub mod config;

/// Error types of the estimator.
pub mod error;

/// The per-device estimator.
pub mod estimator;

/// Remembered fixed camera features.
pub mod memory;

/// Acceptance gates.
pub mod validate;

pub use config::{
    ConfigError, DepthRepairConfig, EstimatorConfig, FeatureMemoryConfig, ReprojectionScope,
};
pub use error::EstimatorError;
pub use estimator::{
    outcome_code, Estimator, FixedObservation, Frame, FrameDiagnostics, Outcome, PoseEstimate,
    WORLD_FRAME_ID,
};
pub use memory::{FeatureMemory, InMemoryFeatureMemory, StoredFeature};
pub use validate::{Gates, Rejection};

#[doc(inline)]
pub use camreg_3d as k3d;

#[doc(inline)]
pub use camreg_features as features;

#[doc(inline)]
pub use camreg_image as image;

#[doc(inline)]
pub use camreg_pnp as pnp;
