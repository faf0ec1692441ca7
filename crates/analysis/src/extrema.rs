use model::{Extremum, ExtremumKind, PeakValleyRow, Profile};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakValleyOptions {
    /// Half-width of the detection window.
    pub radius_m: f64,
    /// Furthest a comparison extremum may sit from its reference.
    pub match_tolerance_m: f64,
}

impl Default for PeakValleyOptions {
    fn default() -> Self {
        Self { radius_m: 50.0, match_tolerance_m: 100.0 }
    }
}

/// Local maxima and minima of a (speed) profile, ordered by distance.
///
/// A bucket is a peak when it holds the largest value of the window
/// `[d - radius, d + radius]` and is strictly above both window edges;
/// valleys mirror that. Same-kind extrema closer than `radius_m` collapse
/// onto the first.
pub fn speed_extrema(profile: &Profile, radius_m: f64) -> Vec<Extremum> {
    let n = profile.values.len();
    if profile.step_m <= 0.0 {
        return Vec::new();
    }
    let w = ((radius_m / profile.step_m).round() as usize).max(1);
    if n <= w.saturating_mul(2) {
        return Vec::new();
    }

    let mut out: Vec<Extremum> = Vec::new();
    for i in w..(n - w) {
        let (Some(v), Some(left), Some(right)) =
            (profile.values[i], profile.values[i - w], profile.values[i + w])
        else {
            continue;
        };

        let window = profile.values[i - w..=i + w].iter().flatten();
        let (lo, hi) = window.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(*x), hi.max(*x))
        });

        let kind = if v >= hi && v > left && v > right {
            ExtremumKind::Peak
        } else if v <= lo && v < left && v < right {
            ExtremumKind::Valley
        } else {
            continue;
        };

        let distance_m = profile.distance(i);
        let duplicate = out
            .iter()
            .rev()
            .any(|e| e.kind == kind && distance_m - e.distance_m < radius_m);
        if !duplicate {
            out.push(Extremum { kind, distance_m, speed_kph: v });
        }
    }
    out
}

/// Pair the extrema of `comparison` with those of `reference`. Each
/// reference extremum takes the nearest unused comparison extremum of the
/// same kind inside the tolerance; leftovers on either side get an empty
/// counterpart.
pub fn peak_valley_table(
    reference: &Profile,
    comparison: &Profile,
    opts: &PeakValleyOptions,
) -> Vec<PeakValleyRow> {
    let refs = speed_extrema(reference, opts.radius_m);
    let cmps = speed_extrema(comparison, opts.radius_m);
    let mut used = vec![false; cmps.len()];
    let mut rows = Vec::with_capacity(refs.len() + cmps.len());

    for r in &refs {
        let nearest = cmps
            .iter()
            .enumerate()
            .filter(|(j, c)| {
                !used[*j]
                    && c.kind == r.kind
                    && (c.distance_m - r.distance_m).abs() <= opts.match_tolerance_m
            })
            .min_by(|(_, a), (_, b)| {
                let da = (a.distance_m - r.distance_m).abs();
                let db = (b.distance_m - r.distance_m).abs();
                da.total_cmp(&db)
            });

        let comparison = nearest.map(|(j, c)| {
            used[j] = true;
            *c
        });
        rows.push(PeakValleyRow { kind: r.kind, reference: Some(*r), comparison });
    }

    for (c, _) in cmps.iter().zip(&used).filter(|(_, u)| !**u) {
        rows.push(PeakValleyRow { kind: c.kind, reference: None, comparison: Some(*c) });
    }

    rows.sort_by(|a, b| a.distance_m().total_cmp(&b.distance_m()));
    rows
}
