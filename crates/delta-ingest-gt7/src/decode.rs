use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use delta_ingest_core::{DecodeError, Snapshot, SnapshotFlags};

use crate::crypto;
use crate::wire::*;

/// Decrypt and parse one console datagram.
///
/// Pure: the same bytes always produce the same snapshot. Datagrams shorter
/// than the standard packet are `Truncated`; lengths between the known sizes
/// are decoded as a standard packet over their first 296 bytes.
pub fn decode(raw: &[u8]) -> Result<Snapshot, DecodeError> {
    if raw.len() < PACKET_SIZE {
        return Err(DecodeError::Truncated { len: raw.len(), min: PACKET_SIZE });
    }
    let variant = PacketVariant::from_len(raw.len()).unwrap_or_default();
    let mut buf = raw[..variant.packet_size()].to_vec();
    if !crypto::decrypt(&mut buf, variant) {
        return Err(DecodeError::Truncated { len: raw.len(), min: PACKET_SIZE });
    }
    parse(&buf)
}

/// Parse an already-decrypted packet, checking the magic first.
pub fn parse(plain: &[u8]) -> Result<Snapshot, DecodeError> {
    if plain.len() < PACKET_SIZE {
        return Err(DecodeError::Truncated { len: plain.len(), min: PACKET_SIZE });
    }
    let r = Fields { buf: plain };

    let magic = r.u32(OFF_MAGIC)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic { expected: MAGIC, found: magic });
    }

    let gear_byte = r.u8(OFF_GEAR)?;
    let flags = r.u16(OFF_FLAGS)?;

    Ok(Snapshot {
        packet_id: r.i32(OFF_PACKET_ID)?,
        current_lap: r.i16(OFF_CURRENT_LAP)?,
        total_laps: r.i16(OFF_TOTAL_LAPS)?,
        last_lap_ms: r.i32(OFF_LAST_LAP_MS)?,
        best_lap_ms: r.i32(OFF_BEST_LAP_MS)?,
        lap_distance_m: None,

        position: r.vec3(OFF_POSITION)?,
        velocity: r.vec3(OFF_VELOCITY)?,
        rotation: r.vec3(OFF_ROTATION)?,

        speed_kph: r.f32(OFF_SPEED_MS)? * 3.6,
        throttle: r.u8(OFF_THROTTLE)? as f32 / PEDAL_SCALE,
        brake: r.u8(OFF_BRAKE)? as f32 / PEDAL_SCALE,
        gear: gear_byte & 0x0F,
        suggested_gear: gear_byte >> 4,
        rpm: r.f32(OFF_ENGINE_RPM)?,

        fuel_level: r.f32(OFF_FUEL_LEVEL)?,
        fuel_capacity: r.f32(OFF_FUEL_CAPACITY)?,
        body_height_mm: r.f32(OFF_BODY_HEIGHT)? * 1000.0,

        tyre_temps_c: r.vec4(OFF_TYRE_TEMP)?,
        suspension_height: r.vec4(OFF_SUSPENSION)?,
        wheel_angular_speed: r.vec4(OFF_WHEEL_SPEED)?,
        tyre_radius_m: r.vec4(OFF_TYRE_RADIUS)?,

        water_temp_c: r.f32(OFF_WATER_TEMP)?,
        oil_temp_c: r.f32(OFF_OIL_TEMP)?,
        car_id: r.i32(OFF_CAR_CODE)?,
        time_of_day_ms: r.i32(OFF_TIME_OF_DAY_MS)?,
        race_position: r.i16(OFF_RACE_POSITION)?,
        total_positions: r.i16(OFF_TOTAL_POSITIONS)?,

        flags: SnapshotFlags {
            on_track: flags & FLAG_ON_TRACK != 0,
            paused: flags & FLAG_PAUSED != 0,
            loading: flags & FLAG_LOADING != 0,
            in_gear: flags & FLAG_IN_GEAR != 0,
            has_turbo: flags & FLAG_HAS_TURBO != 0,
            rev_limiter: flags & FLAG_REV_LIMITER != 0,
            hand_brake: flags & FLAG_HAND_BRAKE != 0,
            lights: flags & FLAG_LIGHTS != 0,
            asm_active: flags & FLAG_ASM_ACTIVE != 0,
            tcs_active: flags & FLAG_TCS_ACTIVE != 0,
        },
    })
}

struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn at(&self, off: usize) -> Cursor<&'a [u8]> {
        let mut c = Cursor::new(self.buf);
        c.set_position(off as u64);
        c
    }

    fn short(&self) -> DecodeError {
        DecodeError::Truncated { len: self.buf.len(), min: PACKET_SIZE }
    }

    fn u8(&self, off: usize) -> Result<u8, DecodeError> {
        self.at(off).read_u8().map_err(|_| self.short())
    }

    fn u16(&self, off: usize) -> Result<u16, DecodeError> {
        self.at(off).read_u16::<LittleEndian>().map_err(|_| self.short())
    }

    fn i16(&self, off: usize) -> Result<i16, DecodeError> {
        self.at(off).read_i16::<LittleEndian>().map_err(|_| self.short())
    }

    fn u32(&self, off: usize) -> Result<u32, DecodeError> {
        self.at(off).read_u32::<LittleEndian>().map_err(|_| self.short())
    }

    fn i32(&self, off: usize) -> Result<i32, DecodeError> {
        self.at(off).read_i32::<LittleEndian>().map_err(|_| self.short())
    }

    fn f32(&self, off: usize) -> Result<f32, DecodeError> {
        self.at(off).read_f32::<LittleEndian>().map_err(|_| self.short())
    }

    fn vec3(&self, off: usize) -> Result<[f32; 3], DecodeError> {
        Ok([self.f32(off)?, self.f32(off + 4)?, self.f32(off + 8)?])
    }

    fn vec4(&self, off: usize) -> Result<[f32; 4], DecodeError> {
        Ok([
            self.f32(off)?,
            self.f32(off + 4)?,
            self.f32(off + 8)?,
            self.f32(off + 12)?,
        ])
    }
}
