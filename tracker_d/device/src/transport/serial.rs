use common::config::TransportConfig;
use common::{ConnectError, TransportError};
use log::{debug, info};
use serialport::SerialPort;
use std::io::{self, Write};
use std::time::Duration;

use super::{FrameReader, TransportChannel};

pub struct SerialChannel {
    port_name: String,
    reader: Option<FrameReader<Box<dyn SerialPort>>>,
}

impl SerialChannel {
    pub fn open(path: &str, config: &TransportConfig) -> Result<Self, ConnectError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ConnectError::InvalidIdentity(
                "serial port path is empty".to_string(),
            ));
        }

        let mut port = serialport::new(path, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::Io(io::ErrorKind::TimedOut) => {
                    ConnectError::Timeout(path.to_string())
                }
                serialport::ErrorKind::InvalidInput => {
                    ConnectError::InvalidIdentity(format!("{}: {}", path, e))
                }
                _ => ConnectError::Unreachable(path.to_string(), e.to_string()),
            })?;

        // Leave the control lines alone so opening the port does not reset the board.
        if let Err(e) = port.write_data_terminal_ready(false) {
            debug!("{}: could not clear DTR: {}", path, e);
        }
        if let Err(e) = port.write_request_to_send(false) {
            debug!("{}: could not clear RTS: {}", path, e);
        }

        info!("Opened serial port {} @ {}", path, config.baud_rate);
        Ok(Self {
            port_name: path.to_string(),
            reader: Some(FrameReader::new(
                port,
                config.max_frame_len,
                config.max_scan_bytes,
            )),
        })
    }
}

impl TransportChannel for SerialChannel {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_frame(),
            None => Err(TransportError::Closed),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let port = reader.get_mut();
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Closed serial port {}", self.port_name);
        }
    }
}
