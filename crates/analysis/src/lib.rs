//! Lap analysis over recorded laps: distance profiles, median lap,
//! speed peaks and valleys, brake points, time deltas and fuel strategy.
//!
//! Everything here is a pure function of its inputs.

pub mod brake;
pub mod compare;
pub mod extrema;
pub mod fuel;
pub mod median;
pub mod profile;

use model::Profile;
use serde_json::{json, Value};

pub use brake::{brake_points, BrakeOptions};
pub use compare::{lap_table, time_delta_by_distance, time_diff_milli_percent};
pub use extrema::{peak_valley_table, speed_extrema, PeakValleyOptions};
pub use fuel::project;
pub use median::{median_candidates, median_profile, MedianOptions};
pub use profile::{build_profile, DistanceGrid};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("not enough valid laps for this computation")]
    InsufficientData,
}

/// Chart rows `{"distance": d, "<label>": value}` over the union of the
/// profiles' buckets. Missing values are `null`.
pub fn overlay_profiles(series: &[(&str, &Profile)]) -> Value {
    let Some(step) = series.iter().map(|(_, p)| p.step_m).find(|s| *s > 0.0) else {
        return Value::Array(Vec::new());
    };
    let max_len = series.iter().map(|(_, p)| p.len()).max().unwrap_or(0);

    let mut rows = Vec::with_capacity(max_len);
    for i in 0..max_len {
        let d = i as f64 * step;
        let mut row = serde_json::Map::new();
        row.insert("distance".into(), json!(d));
        for (label, profile) in series {
            let v = profile.values.get(i).copied().flatten();
            row.insert((*label).to_string(), json!(v));
        }
        rows.push(Value::Object(row));
    }

    Value::Array(rows)
}
