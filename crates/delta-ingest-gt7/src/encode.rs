//! The inverse of [`crate::decode`]: lay out a snapshot the way the console
//! does and apply the stream transform. Used for replaying captured sessions
//! and fabricating datagrams in tests.

use byteorder::{ByteOrder, LittleEndian};

use delta_ingest_core::Snapshot;

use crate::crypto;
use crate::wire::*;

/// Plaintext packet of `variant`'s size. Fields the snapshot does not carry
/// are left zeroed.
pub fn write_plaintext(s: &Snapshot, variant: PacketVariant) -> Vec<u8> {
    let mut buf = vec![0u8; variant.packet_size()];

    LittleEndian::write_u32(&mut buf[OFF_MAGIC..], MAGIC);
    put_f32s(&mut buf, OFF_POSITION, &s.position);
    put_f32s(&mut buf, OFF_VELOCITY, &s.velocity);
    put_f32s(&mut buf, OFF_ROTATION, &s.rotation);
    LittleEndian::write_f32(&mut buf[OFF_BODY_HEIGHT..], s.body_height_mm / 1000.0);
    LittleEndian::write_f32(&mut buf[OFF_ENGINE_RPM..], s.rpm);
    LittleEndian::write_f32(&mut buf[OFF_FUEL_LEVEL..], s.fuel_level);
    LittleEndian::write_f32(&mut buf[OFF_FUEL_CAPACITY..], s.fuel_capacity);
    LittleEndian::write_f32(&mut buf[OFF_SPEED_MS..], s.speed_kph / 3.6);
    LittleEndian::write_f32(&mut buf[OFF_WATER_TEMP..], s.water_temp_c);
    LittleEndian::write_f32(&mut buf[OFF_OIL_TEMP..], s.oil_temp_c);
    put_f32s(&mut buf, OFF_TYRE_TEMP, &s.tyre_temps_c);
    LittleEndian::write_i32(&mut buf[OFF_PACKET_ID..], s.packet_id);
    LittleEndian::write_i16(&mut buf[OFF_CURRENT_LAP..], s.current_lap);
    LittleEndian::write_i16(&mut buf[OFF_TOTAL_LAPS..], s.total_laps);
    LittleEndian::write_i32(&mut buf[OFF_BEST_LAP_MS..], s.best_lap_ms);
    LittleEndian::write_i32(&mut buf[OFF_LAST_LAP_MS..], s.last_lap_ms);
    LittleEndian::write_i32(&mut buf[OFF_TIME_OF_DAY_MS..], s.time_of_day_ms);
    LittleEndian::write_i16(&mut buf[OFF_RACE_POSITION..], s.race_position);
    LittleEndian::write_i16(&mut buf[OFF_TOTAL_POSITIONS..], s.total_positions);
    LittleEndian::write_u16(&mut buf[OFF_FLAGS..], flag_bits(s));
    buf[OFF_GEAR] = (s.gear & 0x0F) | (s.suggested_gear << 4);
    buf[OFF_THROTTLE] = pedal_byte(s.throttle);
    buf[OFF_BRAKE] = pedal_byte(s.brake);
    put_f32s(&mut buf, OFF_WHEEL_SPEED, &s.wheel_angular_speed);
    put_f32s(&mut buf, OFF_TYRE_RADIUS, &s.tyre_radius_m);
    put_f32s(&mut buf, OFF_SUSPENSION, &s.suspension_height);
    LittleEndian::write_i32(&mut buf[OFF_CAR_CODE..], s.car_id);

    buf
}

/// Encrypt a plaintext packet with the given nonce seed.
pub fn encrypt(plain: &[u8], seed: u32, variant: PacketVariant) -> Vec<u8> {
    let mut buf = plain.to_vec();
    crypto::encrypt(&mut buf, seed, variant);
    buf
}

/// Encrypted datagram for `s`, seeded from its packet id.
pub fn encode(s: &Snapshot, variant: PacketVariant) -> Vec<u8> {
    encrypt(&write_plaintext(s, variant), s.packet_id as u32, variant)
}

fn put_f32s(buf: &mut [u8], off: usize, values: &[f32]) {
    for (i, v) in values.iter().enumerate() {
        LittleEndian::write_f32(&mut buf[off + i * 4..], *v);
    }
}

fn pedal_byte(pct: f32) -> u8 {
    (pct * PEDAL_SCALE).round().clamp(0.0, 255.0) as u8
}

fn flag_bits(s: &Snapshot) -> u16 {
    let f = &s.flags;
    [
        (f.on_track, FLAG_ON_TRACK),
        (f.paused, FLAG_PAUSED),
        (f.loading, FLAG_LOADING),
        (f.in_gear, FLAG_IN_GEAR),
        (f.has_turbo, FLAG_HAS_TURBO),
        (f.rev_limiter, FLAG_REV_LIMITER),
        (f.hand_brake, FLAG_HAND_BRAKE),
        (f.lights, FLAG_LIGHTS),
        (f.asm_active, FLAG_ASM_ACTIVE),
        (f.tcs_active, FLAG_TCS_ACTIVE),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .fold(0, |acc, (_, bit)| acc | bit)
}
