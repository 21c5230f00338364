use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use camreg_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Linear index of the pixel at row `r`, column `c`.
    #[inline]
    pub fn index(&self, r: usize, c: usize) -> usize {
        r * self.width + c
    }

    /// Number of pixels covered by this size.
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Single channel image stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    size: ImageSize,
    data: Vec<T>,
}

/// 8-bit grayscale image.
pub type GrayImage = Image<u8>;

/// Depth image in millimeters, zero meaning "no reading".
pub type DepthMap = Image<u16>;

impl<T: Copy> Image<T> {
    /// Create a new image from pixel data.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, or the size is empty,
    /// an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use camreg_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8>::new(
    ///    ImageSize {
    ///       width: 10,
    ///       height: 20,
    ///    },
    ///    vec![0u8; 10 * 20],
    /// ).unwrap();
    ///
    /// assert_eq!(image.width(), 10);
    /// assert_eq!(image.height(), 20);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if size.width == 0 || size.height == 0 {
            return Err(ImageError::EmptyImage(size.width, size.height));
        }
        if data.len() != size.area() {
            return Err(ImageError::InvalidDataLength(data.len(), size.area()));
        }
        Ok(Self { size, data })
    }

    /// Create a new image with every pixel set to `val`.
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError> {
        Self::new(size, vec![val; size.area()])
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Pixel data as a row-major slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable pixel data as a row-major slice.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Returns true if `(x, y)` lies inside the image.
    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.size.width && (y as usize) < self.size.height
    }

    /// Get the pixel at column `x`, row `y`.
    pub fn get_pixel(&self, x: usize, y: usize) -> Result<T, ImageError> {
        if x >= self.size.width || y >= self.size.height {
            return Err(self.out_of_bounds(x, y));
        }
        Ok(self.data[self.size.index(y, x)])
    }

    /// Set the pixel at column `x`, row `y`.
    pub fn set_pixel(&mut self, x: usize, y: usize, val: T) -> Result<(), ImageError> {
        if x >= self.size.width || y >= self.size.height {
            return Err(self.out_of_bounds(x, y));
        }
        let idx = self.size.index(y, x);
        self.data[idx] = val;
        Ok(())
    }

    /// Unchecked-by-contract access for callers that already validated the coordinates.
    #[inline]
    pub(crate) fn at(&self, x: usize, y: usize) -> T {
        self.data[self.size.index(y, x)]
    }

    fn out_of_bounds(&self, x: usize, y: usize) -> ImageError {
        ImageError::PixelOutOfBounds {
            x,
            y,
            width: self.size.width,
            height: self.size.height,
        }
    }
}

impl Image<u8> {
    /// Bilinear sample at a sub-pixel location, clamping to the border.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.size.width - 1) as f32;
        let max_y = (self.size.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.size.width - 1);
        let y1 = (y0 + 1).min(self.size.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = self.at(x0, y0) as f32;
        let p10 = self.at(x1, y0) as f32;
        let p01 = self.at(x0, y1) as f32;
        let p11 = self.at(x1, y1) as f32;

        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        top + (bottom - top) * fy
    }
}
