//! Core telemetry types and traits shared by the GT7 ingest and the lap session

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Console status bits carried with every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlags {
    pub on_track: bool,
    pub paused: bool,
    /// Loading screen or replay/processing state.
    pub loading: bool,
    pub in_gear: bool,
    pub has_turbo: bool,
    pub rev_limiter: bool,
    pub hand_brake: bool,
    pub lights: bool,
    pub asm_active: bool,
    pub tcs_active: bool,
}

/// One decoded telemetry tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub packet_id: i32,
    pub current_lap: i16,
    pub total_laps: i16,
    /// Milliseconds, `-1` when unset.
    pub last_lap_ms: i32,
    /// Milliseconds, `-1` when unset.
    pub best_lap_ms: i32,
    /// In-lap distance if the source reports it. GT7 does not; the
    /// segmenter integrates world position instead.
    pub lap_distance_m: Option<f32>,

    // world pose (meters, y up)
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub rotation: [f32; 3],

    // vehicle dynamics
    pub speed_kph: f32,
    pub throttle: f32, // 0..100
    pub brake: f32,    // 0..100
    pub gear: u8,
    pub suggested_gear: u8,
    pub rpm: f32,

    pub fuel_level: f32,
    pub fuel_capacity: f32,
    pub body_height_mm: f32,

    // FL, FR, RL, RR
    pub tyre_temps_c: [f32; 4],
    pub suspension_height: [f32; 4],
    /// Wheel angular speed, rad/s.
    pub wheel_angular_speed: [f32; 4],
    pub tyre_radius_m: [f32; 4],

    pub water_temp_c: f32,
    pub oil_temp_c: f32,
    pub car_id: i32,
    pub time_of_day_ms: i32,
    pub race_position: i16,
    pub total_positions: i16,

    pub flags: SnapshotFlags,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            packet_id: 0,
            current_lap: 0,
            total_laps: 0,
            last_lap_ms: -1,
            best_lap_ms: -1,
            lap_distance_m: None,
            position: [0.0; 3],
            velocity: [0.0; 3],
            rotation: [0.0; 3],
            speed_kph: 0.0,
            throttle: 0.0,
            brake: 0.0,
            gear: 0,
            suggested_gear: 0,
            rpm: 0.0,
            fuel_level: 0.0,
            fuel_capacity: 0.0,
            body_height_mm: 0.0,
            tyre_temps_c: [0.0; 4],
            suspension_height: [0.0; 4],
            wheel_angular_speed: [0.0; 4],
            tyre_radius_m: [0.0; 4],
            water_temp_c: 0.0,
            oil_temp_c: 0.0,
            car_id: 0,
            time_of_day_ms: 0,
            race_position: -1,
            total_positions: -1,
            flags: SnapshotFlags::default(),
        }
    }
}

impl Snapshot {
    pub fn last_lap_time(&self) -> Option<u32> {
        (self.last_lap_ms > 0).then_some(self.last_lap_ms as u32)
    }

    pub fn best_lap_time(&self) -> Option<u32> {
        (self.best_lap_ms > 0).then_some(self.best_lap_ms as u32)
    }

    /// True when the car is driving: on track, not paused, not loading.
    pub fn is_recordable(&self) -> bool {
        self.flags.on_track && !self.flags.paused && !self.flags.loading
    }

    pub fn is_coasting(&self) -> bool {
        self.throttle <= 0.0 && self.brake <= 0.0
    }

    /// Any wheel whose surface speed exceeds car speed by `ratio`.
    pub fn tyres_spinning(&self, ratio: f32) -> bool {
        if self.speed_kph <= 0.0 {
            return false;
        }
        self.wheel_angular_speed
            .iter()
            .zip(self.tyre_radius_m.iter())
            .any(|(w, r)| (3.6 * r * w).abs() / self.speed_kph > ratio)
    }

    pub fn distance_to(&self, other: &Snapshot) -> f32 {
        let dx = self.position[0] - other.position[0];
        let dy = self.position[1] - other.position[1];
        let dz = self.position[2] - other.position[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Per-packet decode failure. The packet is dropped; the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram truncated: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },
    #[error("magic mismatch: expected 0x{expected:08X}, got 0x{found:08X}")]
    BadMagic { expected: u32, found: u32 },
}

/// Socket-level failure. Fatal during setup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid console address {0:?}")]
    Address(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of a single bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Datagram(Bytes),
    Timeout,
}

/// Datagram endpoint talking to one console.
#[async_trait::async_trait]
pub trait DatagramTransport: Send {
    /// Emit one keep-alive datagram.
    async fn send_heartbeat(&self) -> Result<(), TransportError>;

    /// Wait for one datagram, at most `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Received, TransportError>;
}
