use common::config::TransportConfig;
use common::{ConnectError, TransportError};
use log::{debug, info, warn};
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::{FrameReader, TransportChannel};

/// Persistent TCP link to a device on the local network. The device may
/// vanish without closing the socket, so silence longer than the heartbeat
/// timeout counts as a disconnect.
pub struct WifiChannel {
    peer: SocketAddr,
    reader: Option<FrameReader<TcpStream>>,
    heartbeat: Duration,
    last_frame: Instant,
}

/// `ip:port`, `host:port`, or a bare host that gets the default port.
pub fn resolve_address(address: &str, default_port: u16) -> Result<SocketAddr, ConnectError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ConnectError::InvalidIdentity(
            "WiFi address is empty".to_string(),
        ));
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let with_port = if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, default_port)
    };
    with_port
        .to_socket_addrs()
        .map_err(|e| ConnectError::InvalidIdentity(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| ConnectError::InvalidIdentity(format!("{} did not resolve", address)))
}

impl WifiChannel {
    pub fn connect(address: &str, config: &TransportConfig) -> Result<Self, ConnectError> {
        let peer = resolve_address(address, config.default_wifi_port)?;
        let stream = TcpStream::connect_timeout(
            &peer,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectError::Timeout(peer.to_string()),
            _ => ConnectError::Unreachable(peer.to_string(), e.to_string()),
        })?;

        let read_timeout = Duration::from_millis(config.read_timeout_ms.max(1));
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(|e| ConnectError::Unreachable(peer.to_string(), e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        info!("Connected to {}", peer);
        Ok(Self {
            peer,
            reader: Some(FrameReader::new(
                stream,
                config.max_frame_len,
                config.max_scan_bytes,
            )),
            heartbeat: Duration::from_millis(config.heartbeat_timeout_ms),
            last_frame: Instant::now(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl TransportChannel for WifiChannel {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        match reader.read_frame()? {
            Some(body) => {
                self.last_frame = Instant::now();
                Ok(Some(body))
            }
            None => {
                let silent = self.last_frame.elapsed();
                if silent >= self.heartbeat {
                    Err(TransportError::HeartbeatTimeout(silent.as_millis() as u64))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let stream = reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.get_ref().shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.peer);
        }
    }
}
