use anyhow::Context;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{self, Duration};
use tracing::{debug, info};

use delta_ingest_core::{DatagramTransport, Received, TransportError};

use crate::wire::MAX_PACKET_SIZE;
use crate::GT7Config;

/// UDP session with one console.
///
/// The console answers heartbeats by streaming telemetry to the sender's
/// bound port; it stops a few seconds after the last heartbeat.
pub struct Gt7Transport {
    socket: UdpSocket,
    console: SocketAddr,
    heartbeat: &'static [u8],
    buf: Vec<u8>,
}

impl Gt7Transport {
    pub async fn open(cfg: &GT7Config) -> Result<Self, TransportError> {
        let console = time::timeout(
            Duration::from_secs(5),
            tokio::net::lookup_host((cfg.console_ip.as_str(), cfg.heartbeat_port)),
        )
        .await
        .map_err(|_| TransportError::Address(cfg.console_ip.clone()))?
        .with_context(|| format!("resolve {}", cfg.console_ip))?
        .next()
        .ok_or_else(|| TransportError::Address(cfg.console_ip.clone()))?;

        let socket = UdpSocket::bind(&cfg.bind_addr)
            .await
            .with_context(|| format!("bind {}", cfg.bind_addr))?;
        info!(
            local = %socket.local_addr()?,
            %console,
            variant = ?cfg.packet_variant,
            "GT7 transport open"
        );

        Ok(Self {
            socket,
            console,
            heartbeat: cfg.packet_variant.heartbeat(),
            // room for a little more than the largest known packet
            buf: vec![0u8; MAX_PACKET_SIZE + 64],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn console_addr(&self) -> SocketAddr {
        self.console
    }
}

#[async_trait::async_trait]
impl DatagramTransport for Gt7Transport {
    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.socket
            .send_to(self.heartbeat, self.console)
            .await
            .with_context(|| format!("heartbeat to {}", self.console))?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received, TransportError> {
        match time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
            Err(_) => Ok(Received::Timeout),
            Ok(Ok((len, src))) => {
                if src.ip() != self.console.ip() {
                    debug!(%src, len, "datagram from unexpected host");
                }
                Ok(Received::Datagram(Bytes::copy_from_slice(&self.buf[..len])))
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
