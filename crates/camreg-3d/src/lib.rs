#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera intrinsics.
pub mod camera;

/// Repair of missing depth readings around matched pixels.
pub mod depth;

/// Error types for the 3d module.
pub mod error;

/// Rigid body poses.
pub mod pose;

/// Back-projection of matches into 3D-2D correspondences.
pub mod reconstruct;

pub use camera::CameraIntrinsics;
pub use error::DepthError;
pub use pose::Pose;
