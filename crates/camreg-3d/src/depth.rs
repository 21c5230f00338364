use camreg_features::{Keypoint, Match};
use camreg_image::DepthMap;
use serde::{Deserialize, Serialize};

use crate::DepthError;

/// Parameters of the depth repair search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthSearchParams {
    /// Maximum distance, in pixels, at which a nonzero reading is looked for.
    pub search_radius_px: f64,
    /// Width of the ring, beyond the nearest reading, searched for the closest surface.
    pub ring_width_px: f64,
}

impl Default for DepthSearchParams {
    fn default() -> Self {
        Self {
            search_radius_px: 100.0,
            ring_width_px: 10.0,
        }
    }
}

/// A match whose fixed-side pixel has a usable depth reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMatch {
    /// The match.
    pub m: Match,
    /// Depth at the fixed-side pixel, millimeters, never zero.
    pub depth_mm: u16,
    /// Whether the reading was filled in by the repair.
    pub repaired: bool,
}

/// Pixel of `depth` that holds the depth of a keypoint.
///
/// Coordinates round to the nearest pixel. A keypoint inside the image never rounds past the
/// last row or column. Keypoints outside the image map to pixels outside `depth`.
#[inline]
pub fn keypoint_pixel(kp: &Keypoint, depth: &DepthMap) -> (i64, i64) {
    let snap = |v: f32, len: usize| {
        let p = v.round() as i64;
        if v < len as f32 {
            p.min(len as i64 - 1)
        } else {
            p
        }
    };
    (snap(kp.x, depth.width()), snap(kp.y, depth.height()))
}

/// Visits every pixel within `radius` of `(x, y)` together with its squared distance.
fn for_each_in_disk(
    depth: &DepthMap,
    x: i64,
    y: i64,
    radius: f64,
    mut f: impl FnMut(f64, u16),
) {
    let r = radius.floor().max(0.0) as i64;
    let radius2 = radius * radius;
    let y0 = (y - r).max(0);
    let y1 = (y + r).min(depth.height() as i64 - 1);
    let x0 = (x - r).max(0);
    let x1 = (x + r).min(depth.width() as i64 - 1);
    let width = depth.width();
    let data = depth.as_slice();

    for yy in y0..=y1 {
        let dy = (yy - y) as f64;
        for xx in x0..=x1 {
            let dx = (xx - x) as f64;
            let d2 = dx * dx + dy * dy;
            if d2 <= radius2 {
                f(d2, data[yy as usize * width + xx as usize]);
            }
        }
    }
}

/// Distance, in pixels, from `(x, y)` to the nearest nonzero reading within `max_dist`.
pub fn find_nearest_nonzero(depth: &DepthMap, x: i64, y: i64, max_dist: f64) -> Option<f64> {
    let mut best: Option<f64> = None;
    for_each_in_disk(depth, x, y, max_dist, |d2, v| {
        if v != 0 && best.map_or(true, |b| d2 < b) {
            best = Some(d2);
        }
    });
    best.map(f64::sqrt)
}

/// Lowest nonzero reading at a distance in `[inner, outer]` pixels from `(x, y)`.
pub fn lowest_in_ring(depth: &DepthMap, x: i64, y: i64, inner: f64, outer: f64) -> Option<u16> {
    let inner2 = inner * inner;
    let mut lowest: Option<u16> = None;
    for_each_in_disk(depth, x, y, outer, |d2, v| {
        if v != 0 && d2 >= inner2 && lowest.map_or(true, |l| v < l) {
            lowest = Some(v);
        }
    });
    lowest
}

/// Returns the depth at `(x, y)`, repairing it first if it is zero.
///
/// A zero reading is replaced by the lowest nonzero reading in the ring that starts at the
/// nearest nonzero pixel and is `ring_width_px` wide, and the value is written back into the
/// map. Nonzero readings are never modified.
///
/// Returns `None` if the pixel is outside the map or nothing is found within the search radius.
pub fn repair_depth_at(
    depth: &mut DepthMap,
    x: i64,
    y: i64,
    params: &DepthSearchParams,
) -> Option<(u16, bool)> {
    if !depth.contains(x, y) {
        return None;
    }
    let current = depth.get_pixel(x as usize, y as usize).ok()?;
    if current != 0 {
        return Some((current, false));
    }

    let nearest = find_nearest_nonzero(depth, x, y, params.search_radius_px)?;
    let value = lowest_in_ring(depth, x, y, nearest, nearest + params.ring_width_px)?;
    depth.set_pixel(x as usize, y as usize, value).ok()?;
    Some((value, true))
}

/// Resolves the depth of every match at its fixed-side keypoint, dropping those without one.
///
/// The surviving matches keep their input order. Repaired readings are written into `depth`.
///
/// # Errors
///
/// [`DepthError::InvalidMatchIndex`] if a match does not index into `fixed_keypoints`.
pub fn resolve_match_depths(
    matches: &[Match],
    fixed_keypoints: &[Keypoint],
    depth: &mut DepthMap,
    params: &DepthSearchParams,
) -> Result<Vec<ResolvedMatch>, DepthError> {
    let mut resolved = Vec::with_capacity(matches.len());
    let mut repaired = 0usize;

    for m in matches {
        let kp = fixed_keypoints
            .get(m.train_idx)
            .ok_or(DepthError::InvalidMatchIndex {
                side: "train",
                index: m.train_idx,
                len: fixed_keypoints.len(),
            })?;
        let (x, y) = keypoint_pixel(kp, depth);

        match repair_depth_at(depth, x, y, params) {
            Some((depth_mm, was_repaired)) => {
                repaired += was_repaired as usize;
                resolved.push(ResolvedMatch {
                    m: *m,
                    depth_mm,
                    repaired: was_repaired,
                });
            }
            None => log::trace!("dropping match {m:?}: no depth around ({x}, {y})"),
        }
    }

    log::debug!(
        "depth: {} of {} matches kept, {} repaired",
        resolved.len(),
        matches.len(),
        repaired
    );

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camreg_image::ImageError;

    fn depth_with(points: &[(usize, usize, u16)]) -> Result<DepthMap, ImageError> {
        let mut depth = DepthMap::from_size_val([40, 30].into(), 0)?;
        for &(x, y, v) in points {
            depth.set_pixel(x, y, v)?;
        }
        Ok(depth)
    }

    #[test]
    fn test_nonzero_reading_is_kept() -> Result<(), ImageError> {
        let mut depth = depth_with(&[(10, 10, 1500), (11, 10, 900)])?;
        let res = repair_depth_at(&mut depth, 10, 10, &DepthSearchParams::default());
        assert_eq!(res, Some((1500, false)));
        assert_eq!(depth.get_pixel(10, 10)?, 1500);
        Ok(())
    }

    #[test]
    fn test_repair_prefers_foreground_in_ring() -> Result<(), ImageError> {
        // nearest reading at distance 3 is background, a closer surface sits at distance 8
        let mut depth = depth_with(&[(13, 10, 3000), (10, 18, 1200), (10, 25, 500)])?;
        let params = DepthSearchParams {
            search_radius_px: 20.0,
            ring_width_px: 10.0,
        };
        let res = repair_depth_at(&mut depth, 10, 10, &params);
        // (10, 25) is 15 px away, outside the ring [3, 13]
        assert_eq!(res, Some((1200, true)));
        assert_eq!(depth.get_pixel(10, 10)?, 1200);
        Ok(())
    }

    #[test]
    fn test_nothing_within_radius() -> Result<(), ImageError> {
        let mut depth = depth_with(&[(39, 29, 1000)])?;
        let params = DepthSearchParams {
            search_radius_px: 5.0,
            ring_width_px: 10.0,
        };
        assert_eq!(repair_depth_at(&mut depth, 2, 2, &params), None);
        assert_eq!(depth.get_pixel(2, 2)?, 0);
        assert_eq!(repair_depth_at(&mut depth, -1, 2, &params), None);
        Ok(())
    }

    #[test]
    fn test_nearest_and_ring() -> Result<(), ImageError> {
        let depth = depth_with(&[(5, 5, 800), (8, 9, 700)])?;
        assert_eq!(find_nearest_nonzero(&depth, 5, 5, 10.0), Some(0.0));
        assert_eq!(find_nearest_nonzero(&depth, 5, 9, 10.0), Some(3.0));
        assert_eq!(lowest_in_ring(&depth, 5, 9, 3.0, 4.0), Some(700));
        assert_eq!(lowest_in_ring(&depth, 5, 9, 3.0, 5.0), Some(700));
        assert_eq!(lowest_in_ring(&depth, 5, 9, 0.0, 2.0), None);
        Ok(())
    }

    #[test]
    fn test_resolve_drops_and_keeps_order() -> Result<(), DepthError> {
        let mut depth = depth_with(&[(10, 10, 1000)])?;
        let fixed = vec![
            Keypoint::new(10.2, 9.8),
            Keypoint::new(35.0, 25.0),
            Keypoint::new(11.0, 10.0),
        ];
        let matches = vec![
            Match::new(0, 0, 1.0),
            Match::new(1, 1, 1.0),
            Match::new(2, 2, 1.0),
        ];
        let params = DepthSearchParams {
            search_radius_px: 5.0,
            ring_width_px: 2.0,
        };
        let resolved = resolve_match_depths(&matches, &fixed, &mut depth, &params)?;
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].m.train_idx, 0);
        assert!(!resolved[0].repaired);
        assert_eq!(resolved[1].m.train_idx, 2);
        assert!(resolved[1].repaired);
        assert_eq!(depth.get_pixel(35, 25)?, 0);

        let bad = resolve_match_depths(&[Match::new(0, 9, 1.0)], &fixed, &mut depth, &params);
        assert!(matches!(bad, Err(DepthError::InvalidMatchIndex { index: 9, .. })));
        Ok(())
    }

    #[test]
    fn test_keypoint_pixel_stays_on_the_map() -> Result<(), DepthError> {
        let mut depth = depth_with(&[(39, 29, 1100)])?;
        assert_eq!(keypoint_pixel(&Keypoint::new(39.7, 29.6), &depth), (39, 29));
        assert_eq!(keypoint_pixel(&Keypoint::new(39.4, 12.5), &depth), (39, 13));
        assert_eq!(keypoint_pixel(&Keypoint::new(-0.4, 0.3), &depth), (0, 0));
        assert_eq!(keypoint_pixel(&Keypoint::new(40.0, 29.9), &depth), (40, 29));
        assert_eq!(keypoint_pixel(&Keypoint::new(-0.6, 3.0), &depth), (-1, 3));

        // a corner keypoint keeps its match
        let fixed = vec![Keypoint::new(39.8, 29.7), Keypoint::new(40.2, 29.7)];
        let matches = vec![Match::new(0, 0, 1.0), Match::new(1, 1, 1.0)];
        let params = DepthSearchParams {
            search_radius_px: 0.5,
            ring_width_px: 0.0,
        };
        let resolved = resolve_match_depths(&matches, &fixed, &mut depth, &params)?;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].m.train_idx, 0);
        assert_eq!(resolved[0].depth_mm, 1100);
        assert!(!resolved[0].repaired);
        Ok(())
    }
}
