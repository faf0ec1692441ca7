use model::{BrakePoint, Lap};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrakeOptions {
    /// Brake pressure, percent.
    pub threshold_pct: f64,
    /// Distance the pedal must stay at or above the threshold.
    pub min_hold_m: f64,
}

impl Default for BrakeOptions {
    fn default() -> Self {
        Self { threshold_pct: 5.0, min_hold_m: 5.0 }
    }
}

/// Where the driver got on the brakes, in lap order.
pub fn brake_points(lap: &Lap, opts: &BrakeOptions) -> Vec<BrakePoint> {
    let pts = &lap.points;
    let mut out = Vec::new();
    let mut i = 1;

    while i < pts.len() {
        if !(pts[i - 1].brake < opts.threshold_pct && pts[i].brake >= opts.threshold_pct) {
            i += 1;
            continue;
        }

        let start = &pts[i];
        let mut end = i;
        while end + 1 < pts.len() && pts[end + 1].brake >= opts.threshold_pct {
            end += 1;
        }

        if pts[end].lap_distance_m - start.lap_distance_m >= opts.min_hold_m {
            out.push(BrakePoint {
                distance_m: start.lap_distance_m,
                speed_kph: start.speed_kph,
                x: start.x,
                z: start.z,
            });
        }
        i = end + 1;
    }

    out
}
