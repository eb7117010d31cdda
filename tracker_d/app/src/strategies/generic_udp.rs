use anyhow::{Context, Result};
use api::{OutputSink, SmoothedSample};
use log::info;
use std::net::UdpSocket;

/// One JSON-encoded [`SmoothedSample`] per datagram, for consumers other
/// than VRChat (and for `tracker_udp_rcv`).
pub struct GenericUdpSink {
    socket: Option<UdpSocket>,
    target: String,
    datagrams: u64,
}

impl GenericUdpSink {
    pub fn new(target: String) -> Self {
        Self {
            socket: None,
            target,
            datagrams: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams
    }
}

impl OutputSink for GenericUdpSink {
    fn initialize(&mut self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind UDP socket")?;
        socket
            .connect(&self.target)
            .with_context(|| format!("Failed to connect to {}", self.target))?;
        socket
            .set_nonblocking(true)
            .context("Failed to set non-blocking mode")?;

        info!("Generic UDP output ready, sending to {}", self.target);
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, sample: &SmoothedSample) -> Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        let payload = serde_json::to_vec(sample)?;
        socket
            .send(&payload)
            .with_context(|| format!("UDP send to {} failed", self.target))?;
        self.datagrams += 1;
        Ok(())
    }
}
