use model::{Lap, LapTableRow, Metric, Profile};

use crate::profile::{build_profile, DistanceGrid};

/// Relative lap time difference in thousandths of a percent.
pub fn time_diff_milli_percent(t1: u32, t2: u32) -> Option<i64> {
    if t2 == 0 {
        return None;
    }
    Some(((t1 as f64 / t2 as f64 - 1.0) * 100_000.0).round() as i64)
}

/// Elapsed-time gap along the lap: positive where `comparison` is behind
/// `reference`.
pub fn time_delta_by_distance(reference: &Lap, comparison: &Lap, step_m: f64) -> Profile {
    let grid = DistanceGrid::for_laps([reference, comparison], step_m);
    let r = build_profile(reference, Metric::Time, &grid);
    let c = build_profile(comparison, Metric::Time, &grid);

    let values = r
        .values
        .iter()
        .zip(&c.values)
        .map(|(r, c)| Some((*c)? - (*r)?))
        .collect();

    Profile { metric: Metric::Time, step_m, values }
}

/// One row per lap, in the order given. Diffs are taken against the faster
/// of `best_lap_ms` (a session best known elsewhere) and the fastest valid
/// completed lap among `laps`.
pub fn lap_table<'a>(
    laps: impl IntoIterator<Item = &'a Lap>,
    best_lap_ms: Option<u32>,
) -> Vec<LapTableRow> {
    let laps: Vec<&Lap> = laps.into_iter().collect();
    let fastest = laps.iter().filter(|l| l.valid).filter_map(|l| l.finish_time_ms).min();
    let best = match (best_lap_ms, fastest) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    laps.iter()
        .map(|l| {
            let time_ms = l.finish_time_ms;
            let (diff_to_best_ms, diff_milli_percent) = match (time_ms, best) {
                (Some(t), Some(b)) => (Some(t as i64 - b as i64), time_diff_milli_percent(t, b)),
                _ => (None, None),
            };
            LapTableRow {
                number: l.meta.lap_number,
                lap_id: l.id,
                time_ms,
                diff_to_best_ms,
                diff_milli_percent,
                fuel_consumed: l.fuel_consumed(),
                full_throttle_pct: l.tick_share(l.stats.full_throttle_ticks),
                full_brake_pct: l.tick_share(l.stats.full_brake_ticks),
                coasting_pct: l.tick_share(l.stats.coasting_ticks),
                tyres_spinning_pct: l.tick_share(l.stats.tyres_spinning_ticks),
                valid: l.valid,
                finished_at: l.meta.finished_at,
            }
        })
        .collect()
}
