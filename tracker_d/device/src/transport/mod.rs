mod frame;
mod serial;
mod wifi;

pub use frame::{frame_body, FrameReader, HEADER_LEN, MIN_BODY_LEN, SYNC};
pub use serial::SerialChannel;
pub use wifi::{resolve_address, WifiChannel};

use api::{DeviceIdentity, TransportKind};
use common::config::TransportConfig;
use common::{ConnectError, TransportError};
use log::info;

/// Byte link to one physical device.
pub trait TransportChannel: Send {
    /// Blocks up to the configured read timeout. `Ok(None)` means no
    /// complete frame arrived in that time.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Opens channels. The only place a [`DeviceIdentity`] is validated.
pub trait Connector: Send + Sync {
    fn connect(&self, identity: &DeviceIdentity)
        -> Result<Box<dyn TransportChannel>, ConnectError>;
}

/// Host-to-device control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// LED brightness, sent as `A6` + three digits + `B6`.
    SetBrightness(u8),
}

impl DeviceCommand {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DeviceCommand::SetBrightness(value) => format!("A6{:03}B6", value).into_bytes(),
        }
    }
}

/// Picks the serial or WiFi channel from the identity's transport kind.
pub struct DeviceConnector {
    config: TransportConfig,
}

impl DeviceConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for DeviceConnector {
    fn connect(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Box<dyn TransportChannel>, ConnectError> {
        info!("Connecting to {}", identity);
        match identity.transport {
            TransportKind::Serial => {
                let channel = SerialChannel::open(&identity.address, &self.config)?;
                Ok(Box::new(channel))
            }
            TransportKind::Wifi => {
                let channel = WifiChannel::connect(&identity.address, &self.config)?;
                Ok(Box::new(channel))
            }
        }
    }
}
