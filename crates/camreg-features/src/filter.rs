use serde::{Deserialize, Serialize};

use crate::{FeatureError, Keypoint, Match};

/// What to do with a group of matches that share an origin but disagree on the destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Drop every member of the group.
    #[default]
    DiscardGroup,
    /// Keep the representative with its own distance and drop the others.
    KeepRepresentative,
}

/// Parameters of [`filter_matches`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Maximum accepted descriptor distance (inclusive).
    pub matching_threshold: f32,
    /// Pixel radius under which two keypoints count as the same point.
    pub keypoint_min_dist_threshold: f32,
    /// Handling of contradictory groups.
    pub policy: AmbiguityPolicy,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            matching_threshold: 25.0,
            keypoint_min_dist_threshold: 5.0,
            policy: AmbiguityPolicy::DiscardGroup,
        }
    }
}

/// Keep the matches whose distance is at most `threshold`, preserving order.
pub fn filter_by_distance(matches: &[Match], threshold: f32) -> Vec<Match> {
    matches
        .iter()
        .filter(|m| m.distance <= threshold)
        .copied()
        .collect()
}

/// Check that every match indexes into the given keypoint sets.
pub fn check_match_indices(
    matches: &[Match],
    num_query: usize,
    num_train: usize,
) -> Result<(), FeatureError> {
    for m in matches {
        if m.query_idx >= num_query {
            return Err(FeatureError::InvalidMatchIndex {
                side: "query",
                index: m.query_idx,
                len: num_query,
            });
        }
        if m.train_idx >= num_train {
            return Err(FeatureError::InvalidMatchIndex {
                side: "train",
                index: m.train_idx,
                len: num_train,
            });
        }
    }
    Ok(())
}

/// Partition `matches` into groups of matches with the same mobile-side origin.
///
/// Groups are built in ascending index order. The first match not yet grouped becomes the
/// representative (always the first element of its group), and every later ungrouped match
/// whose query keypoint lies within `tolerance` pixels of the representative's joins it.
///
/// Indices must have been checked with [`check_match_indices`].
pub fn group_by_origin(
    matches: &[Match],
    query_keypoints: &[Keypoint],
    tolerance: f32,
) -> Vec<Vec<usize>> {
    let mut grouped = vec![false; matches.len()];
    let mut groups = Vec::new();

    for i in 0..matches.len() {
        if grouped[i] {
            continue;
        }
        grouped[i] = true;
        let origin = &query_keypoints[matches[i].query_idx];
        let mut group = vec![i];

        for j in (i + 1)..matches.len() {
            if grouped[j] {
                continue;
            }
            if origin.distance_to(&query_keypoints[matches[j].query_idx]) <= tolerance {
                grouped[j] = true;
                group.push(j);
            }
        }

        groups.push(group);
    }

    groups
}

/// Reduce a group to at most one match.
fn resolve_group(
    group: &[usize],
    matches: &[Match],
    train_keypoints: &[Keypoint],
    params: &FilterParams,
) -> Option<Match> {
    let representative = matches[*group.first()?];
    if group.len() == 1 {
        return Some(representative);
    }

    let destination = &train_keypoints[representative.train_idx];
    let same_destination = group.iter().all(|&k| {
        destination.distance_to(&train_keypoints[matches[k].train_idx])
            <= params.keypoint_min_dist_threshold
    });

    if same_destination {
        let mean = group.iter().map(|&k| matches[k].distance).sum::<f32>() / group.len() as f32;
        return Some(Match {
            distance: mean,
            ..representative
        });
    }

    match params.policy {
        AmbiguityPolicy::DiscardGroup => None,
        AmbiguityPolicy::KeepRepresentative => Some(representative),
    }
}

/// Filter raw matches down to unambiguous one-to-one correspondences.
///
/// Drops matches above `matching_threshold`, then groups the rest by mobile origin with
/// [`group_by_origin`]. Groups pointing to the same fixed point merge into their
/// representative with the mean distance. Contradictory groups follow `params.policy`.
/// The output keeps representative order, and filtering it again returns it unchanged.
///
/// # Errors
///
/// [`FeatureError::InvalidMatchIndex`] if a match does not index into the keypoints.
pub fn filter_matches(
    matches: &[Match],
    query_keypoints: &[Keypoint],
    train_keypoints: &[Keypoint],
    params: &FilterParams,
) -> Result<Vec<Match>, FeatureError> {
    check_match_indices(matches, query_keypoints.len(), train_keypoints.len())?;

    let good = filter_by_distance(matches, params.matching_threshold);
    let groups = group_by_origin(&good, query_keypoints, params.keypoint_min_dist_threshold);

    let filtered: Vec<Match> = groups
        .iter()
        .filter_map(|group| resolve_group(group, &good, train_keypoints, params))
        .collect();

    log::debug!(
        "match filter: {} raw, {} under threshold, {} groups, {} kept",
        matches.len(),
        good.len(),
        groups.len(),
        filtered.len()
    );

    Ok(filtered)
}
