#![deny(missing_docs)]
//! Binary features for camera registration.
//!
//! This crate provides the feature side of the registration pipeline:
//!
//! - **Types**: [`Keypoint`], [`Descriptor`] (256-bit, Hamming metric) and [`Match`].
//! - **Extraction**: FAST-9 corners and an ORB extractor for the fixed camera image.
//! - **Matching**: brute-force nearest neighbour under Hamming distance.
//! - **Filtering**: absolute distance threshold followed by origin de-duplication.

mod error;
pub use error::FeatureError;

mod types;
pub use types::{Descriptor, Keypoint, Match, DESCRIPTOR_BYTES};

/// FAST-9 corner detection.
pub mod fast;

/// Brute-force descriptor matching.
pub mod matching;
pub use matching::match_descriptors;

/// Match filtering and merging.
pub mod filter;
pub use filter::{filter_matches, AmbiguityPolicy, FilterParams};

/// ORB keypoint detection and description.
pub mod orb;
pub use orb::OrbDetector;
