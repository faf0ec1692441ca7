//! Gran Turismo 7 simulator interface: UDP session, Salsa20 packet transform
//! and the fixed-offset packet layout.
//!
//! The console streams one encrypted packet per simulation tick (60 Hz) to
//! whoever sent it a heartbeat recently. Packets that fail the magic check
//! after decryption are dropped; nothing here retries or reorders.

pub mod crypto;
pub mod decode;
pub mod encode;
pub mod transport;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use decode::{decode, parse};
pub use encode::{encode, encrypt, write_plaintext};
pub use transport::Gt7Transport;
pub use wire::PacketVariant;

/// Port the console streams telemetry to.
pub const GT7_RECV_PORT: u16 = 33740;
/// Port the console listens on for heartbeats.
pub const GT7_HEARTBEAT_PORT: u16 = 33739;

/// Console ticks per second; packet ids advance once per tick.
pub const TICK_HZ: f64 = 60.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GT7Config {
    /// Local bind address for receiving packets from the console
    pub bind_addr: String,
    /// Console IP address (or host name) to send heartbeat packets to
    pub console_ip: String,
    pub heartbeat_port: u16,
    /// Packet variant to request via heartbeat: 'A', 'B', or '~'
    pub packet_variant: PacketVariant,
    pub heartbeat_interval_ms: u64,
    pub receive_timeout_ms: u64,
}

impl Default for GT7Config {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{GT7_RECV_PORT}"),
            console_ip: "192.168.1.100".into(),
            heartbeat_port: GT7_HEARTBEAT_PORT,
            packet_variant: PacketVariant::Standard,
            heartbeat_interval_ms: 800,
            receive_timeout_ms: 1000,
        }
    }
}

impl GT7Config {
    pub fn with_console(console_ip: impl Into<String>) -> Self {
        Self { console_ip: console_ip.into(), ..Self::default() }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }
}
