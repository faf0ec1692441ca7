use analysis::{BrakeOptions, MedianOptions, PeakValleyOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a freshly recorded lap is considered broken. Only the first
/// `inspect_samples` points of a lap are checked for jumps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityPolicy {
    pub inspect_samples: usize,
    /// Per console tick; scaled by the packet id gap.
    pub max_position_step_m: f64,
    /// Per console tick; scaled by the packet id gap.
    pub max_speed_step_kph: f64,
    /// A lap opened without a lap change above this speed started mid-lap.
    pub truncated_start_speed_kph: f64,
    /// Only applies to sources that report in-lap distance.
    pub max_start_distance_m: f64,
    /// Coming straight from lap 0 (menu, replay start) into a lap above
    /// this number means the car joined mid-lap.
    pub max_clean_start_lap: i16,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            inspect_samples: 10,
            max_position_step_m: 10.0,
            max_speed_step_kph: 40.0,
            truncated_start_speed_kph: 5.0,
            max_start_distance_m: 50.0,
            max_clean_start_lap: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// A reported distance falling from at least `reset_from_m` to at most
    /// `reset_to_m` starts a new lap.
    pub reset_from_m: f64,
    pub reset_to_m: f64,
    /// Without reported distance, a lap also closes once the car passes
    /// within `loop_close_radius_m` of where the lap started, after at
    /// least `loop_min_distance_m` driven. A zero radius turns this off.
    pub loop_close_radius_m: f64,
    pub loop_min_distance_m: f64,
    /// Wheel surface speed over car speed above which a tyre is spinning.
    pub tyre_spin_ratio: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            reset_from_m: 500.0,
            reset_to_m: 50.0,
            loop_close_radius_m: 20.0,
            loop_min_distance_m: 500.0,
            tyre_spin_ratio: 1.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid_step_m: f64,
    pub history_capacity: usize,
    /// Brake-point detection is opt-in.
    pub brake_points: bool,
    /// Recent laps averaged for fuel projections.
    pub fuel_laps: usize,
    pub median: MedianOptions,
    pub peak_valley: PeakValleyOptions,
    pub brake: BrakeOptions,
    pub validity: ValidityPolicy,
    pub segmenter: SegmenterConfig,
    pub publish_interval_ms: u64,
    pub disconnect_after_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_step_m: 1.0,
            history_capacity: 500,
            brake_points: false,
            fuel_laps: 3,
            median: MedianOptions::default(),
            peak_valley: PeakValleyOptions::default(),
            brake: BrakeOptions::default(),
            validity: ValidityPolicy::default(),
            segmenter: SegmenterConfig::default(),
            publish_interval_ms: 250,
            disconnect_after_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("history capacity must be at least 1")]
    ZeroCapacity,
    #[error("reset_to_m ({to}) must be below reset_from_m ({from})")]
    InvertedReset { from: f64, to: f64 },
    #[error("brake threshold {0} is outside 0..=100")]
    BrakeThreshold(f64),
    #[error("{field} ({value}) is above the limit of {max}")]
    TooLarge { field: &'static str, value: f64, max: f64 },
    #[error("grid step {0} m is below 0.05 m")]
    GridTooFine(f64),
}

pub const MIN_GRID_STEP_M: f64 = 0.05;
/// Longest window or match distance the peak/valley options accept.
pub const MAX_SPAN_M: f64 = 100_000.0;

fn at_most(field: &'static str, value: f64, max: f64) -> Result<(), ConfigError> {
    if value <= max {
        Ok(())
    } else {
        Err(ConfigError::TooLarge { field, value, max })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("grid_step_m", self.grid_step_m)?;
        if self.grid_step_m < MIN_GRID_STEP_M {
            return Err(ConfigError::GridTooFine(self.grid_step_m));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let seg = &self.segmenter;
        if !(seg.reset_to_m < seg.reset_from_m) {
            return Err(ConfigError::InvertedReset { from: seg.reset_from_m, to: seg.reset_to_m });
        }
        positive("tyre_spin_ratio", seg.tyre_spin_ratio as f64)?;
        if !(seg.loop_close_radius_m >= 0.0) {
            return Err(ConfigError::NotPositive { field: "loop_close_radius_m", value: seg.loop_close_radius_m });
        }
        positive("loop_min_distance_m", seg.loop_min_distance_m)?;
        at_most("loop_close_radius_m", seg.loop_close_radius_m, seg.loop_min_distance_m)?;

        let v = &self.validity;
        positive("max_position_step_m", v.max_position_step_m)?;
        positive("max_speed_step_kph", v.max_speed_step_kph)?;
        positive("truncated_start_speed_kph", v.truncated_start_speed_kph)?;
        positive("max_start_distance_m", v.max_start_distance_m)?;

        positive("peak_valley.radius_m", self.peak_valley.radius_m)?;
        positive("peak_valley.match_tolerance_m", self.peak_valley.match_tolerance_m)?;
        at_most("peak_valley.radius_m", self.peak_valley.radius_m, MAX_SPAN_M)?;
        at_most("peak_valley.match_tolerance_m", self.peak_valley.match_tolerance_m, MAX_SPAN_M)?;
        if !(0.0..=100.0).contains(&self.brake.threshold_pct) {
            return Err(ConfigError::BrakeThreshold(self.brake.threshold_pct));
        }
        if self.brake.min_hold_m < 0.0 {
            return Err(ConfigError::NotPositive { field: "brake.min_hold_m", value: self.brake.min_hold_m });
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn disconnect_after(&self) -> Duration {
        Duration::from_millis(self.disconnect_after_ms)
    }
}
