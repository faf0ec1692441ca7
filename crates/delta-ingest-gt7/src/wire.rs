//! Plaintext layout of the GT7 simulator interface packet.
//!
//! All multi-byte fields are little-endian. Offsets are relative to the start
//! of the decrypted datagram.

use serde::{Deserialize, Serialize};

/// Size of the standard packet requested with heartbeat `A`.
pub const PACKET_SIZE: usize = 0x128; // 296
/// Heartbeat `B` adds wheel rotation and sway/heave/surge.
pub const PACKET_SIZE_B: usize = 0x13C; // 316
/// Heartbeat `~` adds energy recovery and car-type bytes.
pub const PACKET_SIZE_TILDE: usize = 0x158; // 344
pub const MAX_PACKET_SIZE: usize = PACKET_SIZE_TILDE;

/// "0S7G" once decrypted.
pub const MAGIC: u32 = 0x4737_5330;

pub const OFF_MAGIC: usize = 0x00;
pub const OFF_POSITION: usize = 0x04; // 3× f32
pub const OFF_VELOCITY: usize = 0x10; // 3× f32
pub const OFF_ROTATION: usize = 0x1C; // 3× f32 pitch, yaw, roll
pub const OFF_BODY_HEIGHT: usize = 0x38; // f32, meters
pub const OFF_ENGINE_RPM: usize = 0x3C; // f32
/// Four bytes left in the clear-text stream that seed the nonce.
pub const OFF_IV_SEED: usize = 0x40;
pub const OFF_FUEL_LEVEL: usize = 0x44; // f32
pub const OFF_FUEL_CAPACITY: usize = 0x48; // f32
pub const OFF_SPEED_MS: usize = 0x4C; // f32, m/s
pub const OFF_WATER_TEMP: usize = 0x58; // f32
pub const OFF_OIL_TEMP: usize = 0x5C; // f32
pub const OFF_TYRE_TEMP: usize = 0x60; // 4× f32
pub const OFF_PACKET_ID: usize = 0x70; // i32
pub const OFF_CURRENT_LAP: usize = 0x74; // i16
pub const OFF_TOTAL_LAPS: usize = 0x76; // i16
pub const OFF_BEST_LAP_MS: usize = 0x78; // i32
pub const OFF_LAST_LAP_MS: usize = 0x7C; // i32
pub const OFF_TIME_OF_DAY_MS: usize = 0x80; // i32
pub const OFF_RACE_POSITION: usize = 0x84; // i16
pub const OFF_TOTAL_POSITIONS: usize = 0x86; // i16
pub const OFF_FLAGS: usize = 0x8E; // u16
pub const OFF_GEAR: usize = 0x90; // u8, low nibble current, high nibble suggested
pub const OFF_THROTTLE: usize = 0x91; // u8
pub const OFF_BRAKE: usize = 0x92; // u8
pub const OFF_WHEEL_SPEED: usize = 0xA4; // 4× f32, rad/s
pub const OFF_TYRE_RADIUS: usize = 0xB4; // 4× f32, meters
pub const OFF_SUSPENSION: usize = 0xC4; // 4× f32
pub const OFF_CAR_CODE: usize = 0x124; // i32

pub const FLAG_ON_TRACK: u16 = 1 << 0;
pub const FLAG_PAUSED: u16 = 1 << 1;
pub const FLAG_LOADING: u16 = 1 << 2;
pub const FLAG_IN_GEAR: u16 = 1 << 3;
pub const FLAG_HAS_TURBO: u16 = 1 << 4;
pub const FLAG_REV_LIMITER: u16 = 1 << 5;
pub const FLAG_HAND_BRAKE: u16 = 1 << 6;
pub const FLAG_LIGHTS: u16 = 1 << 7;
pub const FLAG_ASM_ACTIVE: u16 = 1 << 10;
pub const FLAG_TCS_ACTIVE: u16 = 1 << 11;

/// Pedal bytes span 0..=255 and are reported as 0..=100.
pub const PEDAL_SCALE: f32 = 2.55;

/// Packet flavour requested by the heartbeat byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketVariant {
    #[default]
    #[serde(rename = "A")]
    Standard,
    #[serde(rename = "B")]
    Extended,
    #[serde(rename = "~")]
    Full,
}

impl PacketVariant {
    pub const fn heartbeat(self) -> &'static [u8] {
        match self {
            Self::Standard => b"A",
            Self::Extended => b"B",
            Self::Full => b"~",
        }
    }

    pub const fn packet_size(self) -> usize {
        match self {
            Self::Standard => PACKET_SIZE,
            Self::Extended => PACKET_SIZE_B,
            Self::Full => PACKET_SIZE_TILDE,
        }
    }

    /// Constant folded into the nonce.
    pub const fn xor_key(self) -> u32 {
        match self {
            Self::Standard => 0xDEAD_BEAF,
            Self::Extended => 0xDEAD_BEEF,
            Self::Full => 0x55FA_BB4F,
        }
    }

    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            PACKET_SIZE => Some(Self::Standard),
            PACKET_SIZE_B => Some(Self::Extended),
            PACKET_SIZE_TILDE => Some(Self::Full),
            _ => None,
        }
    }
}

impl TryFrom<char> for PacketVariant {
    type Error = char;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'A' => Ok(Self::Standard),
            'B' => Ok(Self::Extended),
            '~' => Ok(Self::Full),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_from_len() {
        assert_eq!(PacketVariant::from_len(296), Some(PacketVariant::Standard));
        assert_eq!(PacketVariant::from_len(316), Some(PacketVariant::Extended));
        assert_eq!(PacketVariant::from_len(344), Some(PacketVariant::Full));
        assert_eq!(PacketVariant::from_len(300), None);
    }

    #[test]
    fn variant_from_heartbeat_char() {
        assert_eq!(PacketVariant::try_from('~'), Ok(PacketVariant::Full));
        assert_eq!(PacketVariant::try_from('x'), Err('x'));
        for v in [PacketVariant::Standard, PacketVariant::Extended, PacketVariant::Full] {
            let c = v.heartbeat()[0] as char;
            assert_eq!(PacketVariant::try_from(c), Ok(v));
        }
    }

    #[test]
    fn fields_fit_in_standard_packet() {
        assert!(OFF_CAR_CODE + 4 <= PACKET_SIZE);
        assert!(OFF_SUSPENSION + 16 <= PACKET_SIZE);
    }
}
