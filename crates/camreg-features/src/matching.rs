use rayon::prelude::*;

use crate::{Descriptor, FeatureError, Match};

/// Match binary descriptors using brute-force Hamming distance.
///
/// For each descriptor in `query`, finds the nearest neighbor in `reference`. Ties are
/// resolved in favour of the lowest reference index, so the result does not depend on how
/// the work is split across threads.
///
/// # Arguments
///
/// * `query` - Descriptors of the mobile frame.
/// * `reference` - Descriptors of the fixed frame, possibly extended with remembered ones.
///
/// # Returns
///
/// Exactly one [`Match`] per query descriptor, in query order.
///
/// # Errors
///
/// [`FeatureError::InsufficientFeatures`] if either set is empty.
pub fn match_descriptors(
    query: &[Descriptor],
    reference: &[Descriptor],
) -> Result<Vec<Match>, FeatureError> {
    if query.is_empty() || reference.is_empty() {
        return Err(FeatureError::InsufficientFeatures {
            query: query.len(),
            reference: reference.len(),
        });
    }

    let matches = query
        .par_iter()
        .enumerate()
        .map(|(i, q)| {
            let mut best_j = 0usize;
            let mut best_dist = u32::MAX;
            for (j, r) in reference.iter().enumerate() {
                let dist = q.hamming(r);
                if dist < best_dist {
                    best_dist = dist;
                    best_j = j;
                }
            }
            Match::new(i, best_j, best_dist as f32)
        })
        .collect();

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with_bits(n: usize) -> Descriptor {
        let mut d = [0u8; 32];
        for i in 0..n {
            d[i / 8] |= 1 << (i % 8);
        }
        Descriptor(d)
    }

    #[test]
    fn test_match_nearest() -> Result<(), FeatureError> {
        let query = vec![descriptor_with_bits(3), descriptor_with_bits(40)];
        let reference = vec![
            descriptor_with_bits(0),
            descriptor_with_bits(42),
            descriptor_with_bits(4),
        ];
        let matches = match_descriptors(&query, &reference)?;
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0], Match::new(0, 2, 1.0));
        assert_eq!(matches[1], Match::new(1, 1, 2.0));
        Ok(())
    }

    #[test]
    fn test_match_ties_pick_lowest_index() -> Result<(), FeatureError> {
        let query = vec![descriptor_with_bits(8)];
        let reference = vec![descriptor_with_bits(16), descriptor_with_bits(0)];
        let matches = match_descriptors(&query, &reference)?;
        assert_eq!(matches[0].train_idx, 0);
        assert_eq!(matches[0].distance, 8.0);
        Ok(())
    }

    #[test]
    fn test_match_empty_sets() {
        let d = vec![Descriptor::default()];
        assert_eq!(
            match_descriptors(&[], &d),
            Err(FeatureError::InsufficientFeatures {
                query: 0,
                reference: 1
            })
        );
        assert!(match_descriptors(&d, &[]).is_err());
    }
}
