use camreg_image::GrayImage;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Offsets `(dx, dy)` of the 16-pixel Bresenham circle of radius 3, clockwise from the top.
pub const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// A FAST corner in pixel coordinates of the image it was detected on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FastCorner {
    /// Column.
    pub x: usize,
    /// Row.
    pub y: usize,
    /// Sum of absolute differences along the detected arc.
    pub score: i32,
}

// Strongest first, then raster order so that suppression is deterministic.
impl Ord for FastCorner {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.y.cmp(&self.y))
            .then_with(|| other.x.cmp(&self.x))
    }
}

impl PartialOrd for FastCorner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Segment test at one pixel.
///
/// Returns the corner score if at least `arc_length` contiguous circle pixels are all
/// brighter than `center + threshold` or all darker than `center - threshold`.
fn corner_score(
    src: &[u8],
    pixel_idx: usize,
    offsets: &[isize; 16],
    threshold: u8,
    arc_length: u8,
) -> Option<i32> {
    let center = src[pixel_idx];
    let lower = center.saturating_sub(threshold);
    let upper = center.saturating_add(threshold);

    let pixel = |k: usize| src[(pixel_idx as isize + offsets[k]) as usize];

    // High-speed test on the four compass points.
    let compass = [pixel(0), pixel(4), pixel(8), pixel(12)];
    let n_bright = compass.iter().filter(|&&p| p > upper).count();
    let n_dark = compass.iter().filter(|&&p| p < lower).count();
    let needed = if arc_length >= 12 { 3 } else { 2 };
    if n_bright < needed && n_dark < needed {
        return None;
    }

    let mut pixels = [0u8; 16];
    let mut bright = 0u16;
    let mut dark = 0u16;
    for (k, p) in pixels.iter_mut().enumerate() {
        *p = pixel(k);
        if *p > upper {
            bright |= 1 << k;
        } else if *p < lower {
            dark |= 1 << k;
        }
    }

    let window = ((1u32 << arc_length) - 1) as u16;
    for shift in 0..16u32 {
        let mask = window.rotate_left(shift);
        if bright & mask == mask || dark & mask == mask {
            let score = (0..arc_length as usize)
                .map(|k| {
                    let p = pixels[(shift as usize + k) % 16];
                    center.abs_diff(p) as i32 - threshold as i32
                })
                .sum();
            return Some(score);
        }
    }

    None
}

/// FAST corner detector with 3x3 non-maximum suppression.
///
/// # Arguments
///
/// * `src` - The source grayscale image.
/// * `threshold` - Intensity difference a circle pixel needs to count as brighter or darker.
/// * `arc_length` - Number of contiguous circle pixels required, 9 for FAST-9.
/// * `border` - Corners closer than this to the image border are ignored, at least 3.
///
/// # Returns
///
/// The surviving corners, strongest first.
pub fn fast_corners(
    src: &GrayImage,
    threshold: u8,
    arc_length: u8,
    border: usize,
) -> Vec<FastCorner> {
    let border = border.max(3);
    let (cols, rows) = (src.width(), src.height());
    if cols <= 2 * border || rows <= 2 * border {
        return Vec::new();
    }
    let arc_length = arc_length.clamp(1, 16);

    let stride = cols as isize;
    let mut offsets = [0isize; 16];
    for (o, &(dx, dy)) in offsets.iter_mut().zip(CIRCLE_OFFSETS.iter()) {
        *o = dy as isize * stride + dx as isize;
    }

    let data = src.as_slice();
    let corners: Vec<FastCorner> = (border..rows - border)
        .into_par_iter()
        .flat_map_iter(|y| {
            (border..cols - border).filter_map(move |x| {
                corner_score(data, y * cols + x, &offsets, threshold, arc_length)
                    .map(|score| FastCorner { x, y, score })
            })
        })
        .collect();

    let mut heap = BinaryHeap::from(corners);
    let mut suppressed = vec![false; rows * cols];
    let mut kept = Vec::new();
    while let Some(corner) = heap.pop() {
        let idx = corner.y * cols + corner.x;
        if suppressed[idx] {
            continue;
        }
        kept.push(corner);

        for ny in corner.y - 1..=corner.y + 1 {
            for nx in corner.x - 1..=corner.x + 1 {
                suppressed[ny * cols + nx] = true;
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use camreg_image::ImageError;

    #[test]
    fn test_fast_single_peak() -> Result<(), ImageError> {
        #[rustfmt::skip]
        let img = GrayImage::new(
            [7, 7].into(),
            vec![
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50, 200,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
            ],
        )?;
        let corners = fast_corners(&img, 100, 9, 3);
        assert_eq!(corners.len(), 1);
        assert_eq!((corners[0].x, corners[0].y), (3, 3));
        assert_eq!(corners[0].score, 9 * 50);
        Ok(())
    }

    #[test]
    fn test_fast_edge_is_not_corner() -> Result<(), ImageError> {
        #[rustfmt::skip]
        let img = GrayImage::new(
            [7, 7].into(),
            vec![
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
                50,  50,  50, 200, 200, 200, 200,
            ],
        )?;
        assert!(fast_corners(&img, 100, 9, 3).is_empty());
        Ok(())
    }

    #[test]
    fn test_fast_nms_keeps_one_per_neighbourhood() -> Result<(), ImageError> {
        let mut img = GrayImage::from_size_val([20, 20].into(), 20)?;
        for y in 8..12 {
            for x in 8..12 {
                img.set_pixel(x, y, 230)?;
            }
        }
        let corners = fast_corners(&img, 40, 9, 3);
        assert!(!corners.is_empty());
        for (i, a) in corners.iter().enumerate() {
            for b in corners.iter().skip(i + 1) {
                let close = a.x.abs_diff(b.x) <= 1 && a.y.abs_diff(b.y) <= 1;
                assert!(!close, "{a:?} and {b:?} survived suppression");
            }
        }
        Ok(())
    }
}
