//! Fuel strategy: how far the tank goes under each mixture setting.
//!
//! Figures are approximate. The relative mixture model assumes each lean
//! step costs a fixed share of power and saves twice that share of fuel.

use model::{FuelMap, FuelProjection, Lap};

use crate::AnalysisError;

/// Project remaining laps and time for each candidate fuel map from the
/// average of `recent_laps`. Only valid, completed laps that burned fuel
/// count towards the baseline.
pub fn project<'a>(
    current_fuel: f64,
    recent_laps: impl IntoIterator<Item = &'a Lap>,
    candidates: &[FuelMap],
) -> Result<Vec<FuelProjection>, AnalysisError> {
    let (mut fuel_sum, mut time_sum, mut n) = (0.0, 0.0, 0usize);
    for lap in recent_laps {
        let Some(ms) = lap.finish_time_ms else { continue };
        let used = lap.fuel_consumed();
        if !lap.valid || used <= 0.0 {
            continue;
        }
        fuel_sum += used;
        time_sum += ms as f64;
        n += 1;
    }
    if n == 0 {
        return Err(AnalysisError::InsufficientData);
    }

    let base_fuel = fuel_sum / n as f64;
    let base_time = time_sum / n as f64;

    Ok(candidates
        .iter()
        .map(|map| {
            let fuel_per_lap = base_fuel * map.consumption_ratio;
            let laps_remaining = if fuel_per_lap > 0.0 {
                current_fuel.max(0.0) / fuel_per_lap
            } else {
                f64::INFINITY
            };
            let lap_time_diff_ms = base_time * (1.0 - map.power_ratio);
            let expected_lap_time_ms = base_time + lap_time_diff_ms;
            FuelProjection {
                fuel_map: *map,
                fuel_per_lap,
                laps_remaining,
                time_remaining_ms: laps_remaining * expected_lap_time_ms,
                lap_time_diff_ms,
                expected_lap_time_ms,
                feasible: laps_remaining >= 1.0,
            }
        })
        .collect())
}
