#![deny(missing_docs)]
//! Image containers used by the registration pipeline: grayscale frames and depth maps.

/// Image representation.
pub mod image;

/// Error types for the image module.
pub mod error;

pub use crate::error::ImageError;
pub use crate::image::{DepthMap, GrayImage, Image, ImageSize};
