use camreg_image::{GrayImage, ImageError, ImageSize};

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Separable gaussian blur with replicated borders.
pub(crate) fn gaussian_blur(src: &GrayImage, sigma: f32) -> Result<GrayImage, ImageError> {
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (w, h) = (src.width(), src.height());
    let data = src.as_slice();

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let xx = (x as i64 + k as i64 - radius).clamp(0, w as i64 - 1) as usize;
                acc += kv * row[xx] as f32;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let yy = (y as i64 + k as i64 - radius).clamp(0, h as i64 - 1) as usize;
                acc += kv * horizontal[yy * w + x];
            }
            out[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::new(src.size(), out)
}

/// Bilinear resize to `dst_size`, sampling at pixel centers.
pub(crate) fn resize_bilinear(src: &GrayImage, dst_size: ImageSize) -> Result<GrayImage, ImageError> {
    let sx = src.width() as f32 / dst_size.width as f32;
    let sy = src.height() as f32 / dst_size.height as f32;

    let mut out = Vec::with_capacity(dst_size.area());
    for y in 0..dst_size.height {
        let fy = (y as f32 + 0.5) * sy - 0.5;
        for x in 0..dst_size.width {
            let fx = (x as f32 + 0.5) * sx - 0.5;
            out.push(src.sample_bilinear(fx, fy).round().clamp(0.0, 255.0) as u8);
        }
    }

    GrayImage::new(dst_size, out)
}

/// Smooth then downsample `img` by `downscale`.
fn pyramid_reduce(img: &GrayImage, downscale: f32) -> Result<GrayImage, ImageError> {
    let sigma = 2.0 * downscale / 6.0;
    let smoothed = gaussian_blur(img, sigma)?;

    let new_size = ImageSize {
        width: (img.width() as f32 / downscale).round() as usize,
        height: (img.height() as f32 / downscale).round() as usize,
    };
    resize_bilinear(&smoothed, new_size)
}

/// Build an image pyramid of at most `levels` levels.
///
/// Construction stops early when the next level would have a side shorter than `min_side`.
pub(crate) fn build_pyramid(
    img: &GrayImage,
    levels: usize,
    downscale: f32,
    min_side: usize,
) -> Result<Vec<GrayImage>, ImageError> {
    let mut pyramid = Vec::with_capacity(levels);
    pyramid.push(img.clone());

    for _ in 1..levels {
        let Some(current) = pyramid.last() else {
            break;
        };
        let next_w = (current.width() as f32 / downscale).round() as usize;
        let next_h = (current.height() as f32 / downscale).round() as usize;
        if next_w < min_side || next_h < min_side {
            break;
        }
        let next = pyramid_reduce(current, downscale)?;
        pyramid.push(next);
    }

    Ok(pyramid)
}
