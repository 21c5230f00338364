/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when the pixel data length does not match the image size.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidDataLength(usize, usize),

    /// Error when a pixel coordinate lies outside the image.
    #[error("Pixel ({x}, {y}) is out of bounds for an image of {width}x{height}")]
    PixelOutOfBounds {
        /// Column of the requested pixel.
        x: usize,
        /// Row of the requested pixel.
        y: usize,
        /// Image width.
        width: usize,
        /// Image height.
        height: usize,
    },

    /// Error when the image has zero width or height.
    #[error("Image size must be non-zero, got {0}x{1}")]
    EmptyImage(usize, usize),
}
