//! ORB features for the fixed camera image.
//!
//! The mobile device ships its own keypoints and descriptors; only the fixed camera image is
//! described here, with the same 256-bit rotated BRIEF layout.

mod extractor;
mod pattern;
mod pyramid;

pub use extractor::OrbDetector;
