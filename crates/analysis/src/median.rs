use model::{Lap, Metric, Profile};
use serde::{Deserialize, Serialize};

use crate::profile::{build_profile, DistanceGrid};
use crate::AnalysisError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianOptions {
    /// Most recent usable laps taken into the median.
    pub max_laps: usize,
    /// Only completed laps within this many ms of the best completed lap.
    pub lap_time_window_ms: Option<u32>,
    pub include_invalid: bool,
}

impl Default for MedianOptions {
    fn default() -> Self {
        Self { max_laps: 10, lap_time_window_ms: Some(10_000), include_invalid: false }
    }
}

/// Laps that may contribute, most recent first, in input order.
pub fn median_candidates<'a>(
    laps: impl IntoIterator<Item = &'a Lap>,
    opts: &MedianOptions,
) -> Vec<&'a Lap> {
    let usable: Vec<&Lap> = laps
        .into_iter()
        .filter(|l| (l.valid || opts.include_invalid) && !l.points.is_empty())
        .collect();

    let usable = match opts.lap_time_window_ms {
        Some(window) => {
            let Some(best) = usable.iter().filter_map(|l| l.finish_time_ms).min() else {
                return Vec::new();
            };
            usable
                .into_iter()
                .filter(|l| {
                    l.finish_time_ms
                        .is_some_and(|t| t.abs_diff(best) <= window)
                })
                .collect()
        }
        None => usable,
    };

    usable.into_iter().take(opts.max_laps.max(1)).collect()
}

/// Per-bucket median of `metric` across the recent usable laps. `laps` is
/// expected most recent first.
pub fn median_profile<'a>(
    laps: impl IntoIterator<Item = &'a Lap>,
    metric: Metric,
    step_m: f64,
    opts: &MedianOptions,
) -> Result<Profile, AnalysisError> {
    let picked = median_candidates(laps, opts);
    if picked.is_empty() {
        return Err(AnalysisError::InsufficientData);
    }

    let grid = DistanceGrid::for_laps(picked.iter().copied(), step_m);
    let profiles: Vec<Profile> = picked
        .iter()
        .map(|l| build_profile(l, metric, &grid))
        .collect();

    let mut column = Vec::with_capacity(profiles.len());
    let mut values = Vec::with_capacity(grid.buckets);
    for i in 0..grid.buckets {
        column.clear();
        column.extend(profiles.iter().filter_map(|p| p.values[i]));
        values.push(median(&mut column));
    }

    Ok(Profile { metric, step_m, values })
}

fn median(v: &mut [f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}
