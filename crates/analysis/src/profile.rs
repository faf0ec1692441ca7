use model::{Lap, Metric, Profile};
use serde::{Deserialize, Serialize};

/// Uniform distance buckets starting at 0 m.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceGrid {
    pub step_m: f64,
    pub buckets: usize,
}

impl DistanceGrid {
    /// Enough buckets to cover `length_m` inclusive.
    pub fn new(step_m: f64, length_m: f64) -> Self {
        let buckets = if step_m > 0.0 && length_m >= 0.0 {
            ((length_m / step_m).floor() as usize).saturating_add(1)
        } else {
            0
        };
        Self { step_m, buckets }
    }

    /// Grid covering the longest of `laps`.
    pub fn for_laps<'a>(laps: impl IntoIterator<Item = &'a Lap>, step_m: f64) -> Self {
        let longest = laps.into_iter().map(Lap::length_m).fold(0.0_f64, f64::max);
        Self::new(step_m, longest)
    }

    pub fn distance(&self, bucket: usize) -> f64 {
        bucket as f64 * self.step_m
    }
}

/// Distance-ordered samples of one metric. Points that fall behind the
/// furthest distance seen so far are dropped.
fn monotone_samples(lap: &Lap, metric: Metric) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(lap.points.len());
    let mut furthest = f64::NEG_INFINITY;
    for p in &lap.points {
        let d = p.lap_distance_m;
        let v = metric.value(p);
        if !d.is_finite() || !v.is_finite() || d < furthest {
            continue;
        }
        furthest = d;
        out.push((d, v));
    }
    out
}

/// Resample `metric` of `lap` onto `grid` by linear interpolation between
/// the two samples bracketing each bucket.
pub fn build_profile(lap: &Lap, metric: Metric, grid: &DistanceGrid) -> Profile {
    let samples = monotone_samples(lap, metric);
    let mut values = Vec::with_capacity(grid.buckets);

    let (first, last) = match (samples.first(), samples.last()) {
        (Some(f), Some(l)) => (f.0, l.0),
        _ => {
            values.resize(grid.buckets, None);
            return Profile { metric, step_m: grid.step_m, values };
        }
    };

    let mut j = 0;
    for i in 0..grid.buckets {
        let d = grid.distance(i);
        if d < first || d > last {
            values.push(None);
            continue;
        }
        while j + 1 < samples.len() && samples[j + 1].0 < d {
            j += 1;
        }
        let (d0, v0) = samples[j];
        if d0 >= d || j + 1 == samples.len() {
            values.push(Some(v0));
            continue;
        }
        let (d1, v1) = samples[j + 1];
        let t = (d - d0) / (d1 - d0);
        values.push(Some(v0 + (v1 - v0) * t));
    }

    Profile { metric, step_m: grid.step_m, values }
}
