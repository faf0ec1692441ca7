use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use time::OffsetDateTime;
use uuid::Uuid;

/// One recorded tick inside a lap.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetryPoint {
    /// Elapsed since the first point of the lap.
    pub t_ms: f64,
    pub lap_distance_m: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub speed_kph: f64,
    pub throttle: f64, // 0..100
    pub brake: f64,    // 0..100
    pub gear: u8,
    pub rpm: f64,
    pub body_height_mm: f64,
    pub fuel_level: f64,
    pub tyres_spinning: bool,
}

impl TelemetryPoint {
    pub fn is_coasting(&self) -> bool {
        self.throttle <= 0.0 && self.brake <= 0.0
    }
}

const FULL_PEDAL: f64 = 99.9;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapMeta {
    pub lap_number: u32,
    pub car_id: i32,
    pub total_laps: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

/// Why a lap was marked invalid.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum LapAnomaly {
    /// Recording began mid-lap while the car was already moving, e.g. a
    /// replay or demo joined part way through.
    TruncatedStart { speed_kph: f64 },
    /// Implausible jump between two of the first samples.
    Discontinuity { index: usize, position_step_m: f64, speed_step_kph: f64 },
    /// Lap number went backwards or the race ended before the lap did.
    Abandoned { from_lap: i32, to_lap: i32 },
}

impl fmt::Display for LapAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedStart { speed_kph } => {
                write!(f, "recording started mid-lap at {speed_kph:.0} km/h")
            }
            Self::Discontinuity { index, position_step_m, speed_step_kph } => write!(
                f,
                "jump of {position_step_m:.1} m / {speed_step_kph:.1} km/h at sample {index}"
            ),
            Self::Abandoned { from_lap, to_lap } => {
                write!(f, "lap counter went from {from_lap} to {to_lap}")
            }
        }
    }
}

/// Running counters gathered while a lap records.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LapStats {
    pub max_speed_kph: f64,
    pub min_body_height_mm: f64,
    pub fuel_at_start: f64,
    pub fuel_at_end: f64,
    pub ticks: u32,
    pub full_throttle_ticks: u32,
    pub full_brake_ticks: u32,
    pub coasting_ticks: u32,
    pub throttle_and_brake_ticks: u32,
    pub tyres_spinning_ticks: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Lap {
    #[serde(with = "uuid::serde::simple")]
    pub id: Uuid,
    pub meta: LapMeta,
    /// None while the lap is open or when it never completed.
    pub finish_time_ms: Option<u32>,
    pub valid: bool,
    #[serde(default)]
    pub anomaly: Option<LapAnomaly>,
    /// Closed on request instead of at the line.
    #[serde(default)]
    pub manual: bool,
    pub stats: LapStats,
    #[serde(default)]
    pub points: Vec<TelemetryPoint>,
}

impl Lap {
    pub fn new(lap_number: u32, car_id: i32, total_laps: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            meta: LapMeta { lap_number, car_id, total_laps, finished_at: None },
            finish_time_ms: None,
            valid: true,
            anomaly: None,
            manual: false,
            stats: LapStats::default(),
            points: vec![],
        }
    }

    /// Append a point and fold it into the lap counters.
    pub fn record(&mut self, p: TelemetryPoint) {
        let s = &mut self.stats;
        if self.points.is_empty() {
            s.fuel_at_start = p.fuel_level;
            s.min_body_height_mm = p.body_height_mm;
        }
        s.fuel_at_end = p.fuel_level;
        s.ticks += 1;
        s.max_speed_kph = s.max_speed_kph.max(p.speed_kph);
        s.min_body_height_mm = s.min_body_height_mm.min(p.body_height_mm);
        if p.throttle >= FULL_PEDAL {
            s.full_throttle_ticks += 1;
        }
        if p.brake >= FULL_PEDAL {
            s.full_brake_ticks += 1;
        }
        if p.is_coasting() {
            s.coasting_ticks += 1;
        }
        if p.throttle > 0.0 && p.brake > 0.0 {
            s.throttle_and_brake_ticks += 1;
        }
        if p.tyres_spinning {
            s.tyres_spinning_ticks += 1;
        }
        self.points.push(p);
    }

    pub fn mark_invalid(&mut self, anomaly: LapAnomaly) {
        self.valid = false;
        self.anomaly = Some(anomaly);
    }

    pub fn is_complete(&self) -> bool {
        self.finish_time_ms.is_some()
    }

    /// Distance of the furthest recorded point.
    pub fn length_m(&self) -> f64 {
        self.points.iter().map(|p| p.lap_distance_m).fold(0.0, f64::max)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.points.last().map(|p| p.t_ms).unwrap_or(0.0)
    }

    pub fn fuel_consumed(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.stats.fuel_at_start - self.stats.fuel_at_end
    }

    /// Share of recorded ticks, in percent.
    pub fn tick_share(&self, ticks: u32) -> f64 {
        if self.stats.ticks == 0 {
            return 0.0;
        }
        ticks as f64 / self.stats.ticks as f64 * 100.0
    }

    pub fn title(&self) -> String {
        match self.finish_time_ms {
            Some(ms) => format!("Lap {} - {}", self.meta.lap_number, format_lap_time(ms)),
            None => format!("Lap {} - --:--.---", self.meta.lap_number),
        }
    }
}

/// `m:ss.mmm`
pub fn format_lap_time(ms: u32) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{minutes}:{seconds:02}.{:03}", ms % 1000)
}

/// Channel to chart against distance.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Speed,
    Throttle,
    Brake,
    /// 100 while neither pedal is pressed, else 0.
    Coast,
    Rpm,
    /// Elapsed lap time in ms.
    Time,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Speed,
        Metric::Throttle,
        Metric::Brake,
        Metric::Coast,
        Metric::Rpm,
        Metric::Time,
    ];

    pub fn value(self, p: &TelemetryPoint) -> f64 {
        match self {
            Metric::Speed => p.speed_kph,
            Metric::Throttle => p.throttle,
            Metric::Brake => p.brake,
            Metric::Coast => {
                if p.is_coasting() {
                    100.0
                } else {
                    0.0
                }
            }
            Metric::Rpm => p.rpm,
            Metric::Time => p.t_ms,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::Speed => "speed",
            Metric::Throttle => "throttle",
            Metric::Brake => "brake",
            Metric::Coast => "coast",
            Metric::Rpm => "rpm",
            Metric::Time => "time",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown metric {s:?}"))
    }
}

/// A metric resampled onto a uniform distance grid. Bucket `i` sits at
/// `i * step_m`; `None` where the source lap has no data.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Profile {
    pub metric: Metric,
    pub step_m: f64,
    pub values: Vec<Option<f64>>,
}

impl Profile {
    pub fn distance(&self, bucket: usize) -> f64 {
        bucket as f64 * self.step_m
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn defined(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Value of the bucket nearest to `distance_m`.
    pub fn at(&self, distance_m: f64) -> Option<f64> {
        if !(distance_m >= 0.0) || self.step_m <= 0.0 {
            return None;
        }
        let i = (distance_m / self.step_m).round() as usize;
        self.values.get(i).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, Option<f64>)> + '_ {
        self.values.iter().enumerate().map(|(i, v)| (self.distance(i), *v))
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum ExtremumKind {
    Peak,
    Valley,
}

/// Local speed maximum or minimum.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Extremum {
    pub kind: ExtremumKind,
    pub distance_m: f64,
    pub speed_kph: f64,
}

/// A reference extremum next to its counterpart on the comparison lap.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PeakValleyRow {
    pub kind: ExtremumKind,
    pub reference: Option<Extremum>,
    pub comparison: Option<Extremum>,
}

impl PeakValleyRow {
    pub fn distance_m(&self) -> f64 {
        self.reference
            .or(self.comparison)
            .map(|e| e.distance_m)
            .unwrap_or(0.0)
    }

    /// comparison − reference, when both sides exist.
    pub fn speed_delta_kph(&self) -> Option<f64> {
        Some(self.comparison?.speed_kph - self.reference?.speed_kph)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct BrakePoint {
    pub distance_m: f64,
    pub speed_kph: f64,
    pub x: f64,
    pub z: f64,
}

/// Relative fuel mixture. Positive settings are leaner.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct FuelMap {
    pub mixture_setting: i8,
    pub power_ratio: f64,
    pub consumption_ratio: f64,
}

impl FuelMap {
    /// Each step trades 4 % power for 8 % consumption.
    pub fn relative(mixture_setting: i8) -> Self {
        let s = mixture_setting as f64;
        Self {
            mixture_setting,
            power_ratio: (100.0 - s * 4.0) / 100.0,
            consumption_ratio: (100.0 - s * 8.0) / 100.0,
        }
    }

    pub fn standard_range() -> Vec<FuelMap> {
        (-5..=5).map(FuelMap::relative).collect()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FuelProjection {
    pub fuel_map: FuelMap,
    pub fuel_per_lap: f64,
    pub laps_remaining: f64,
    pub time_remaining_ms: f64,
    pub lap_time_diff_ms: f64,
    pub expected_lap_time_ms: f64,
    /// At least one more lap fits in the tank.
    pub feasible: bool,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapTableRow {
    pub number: u32,
    #[serde(with = "uuid::serde::simple")]
    pub lap_id: Uuid,
    pub time_ms: Option<u32>,
    pub diff_to_best_ms: Option<i64>,
    pub diff_milli_percent: Option<i64>,
    pub fuel_consumed: f64,
    pub full_throttle_pct: f64,
    pub full_brake_pct: f64,
    pub coasting_pct: f64,
    pub tyres_spinning_pct: f64,
    pub valid: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SessionStats {
    pub best_lap_ms: Option<u32>,
    pub max_speed_kph: f64,
    pub min_body_height_mm: Option<f64>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self { best_lap_ms: None, max_speed_kph: 0.0, min_body_height_mm: None }
    }
}
