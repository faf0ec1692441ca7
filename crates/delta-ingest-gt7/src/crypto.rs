//! Salsa20 transform over whole datagrams.
//!
//! Key: first 32 bytes of "Simulator Interface Packet GT7 ver 0.0".
//! Nonce: `[seed ^ xor_key, seed]`, both little-endian, where `seed` is the
//! u32 stored in the clear at [`OFF_IV_SEED`] of the encrypted datagram.

use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

use crate::wire::{PacketVariant, OFF_IV_SEED};

const SALSA_KEY: &[u8; 32] = b"Simulator Interface Packet GT7 v";

fn nonce(seed: u32, variant: PacketVariant) -> [u8; 8] {
    let mut nonce = [0u8; 8];
    nonce[..4].copy_from_slice(&(seed ^ variant.xor_key()).to_le_bytes());
    nonce[4..].copy_from_slice(&seed.to_le_bytes());
    nonce
}

fn apply(buf: &mut [u8], seed: u32, variant: PacketVariant) {
    let nonce = nonce(seed, variant);
    let mut cipher = Salsa20::new(SALSA_KEY.into(), (&nonce).into());
    cipher.apply_keystream(buf);
}

/// Seed stored at the nonce offset, `None` for buffers too short to hold it.
pub fn iv_seed(buf: &[u8]) -> Option<u32> {
    let b = buf.get(OFF_IV_SEED..OFF_IV_SEED + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decrypt in place. Returns false when the buffer cannot carry a seed.
pub fn decrypt(buf: &mut [u8], variant: PacketVariant) -> bool {
    match iv_seed(buf) {
        Some(seed) => {
            apply(buf, seed, variant);
            true
        }
        None => false,
    }
}

/// Encrypt in place and store `seed` at the nonce offset. The four plaintext
/// bytes under the seed do not survive the round trip.
pub fn encrypt(buf: &mut [u8], seed: u32, variant: PacketVariant) {
    apply(buf, seed, variant);
    if let Some(slot) = buf.get_mut(OFF_IV_SEED..OFF_IV_SEED + 4) {
        slot.copy_from_slice(&seed.to_le_bytes());
    }
}
