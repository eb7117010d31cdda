pub mod generic_udp;
pub mod vrchat;

use anyhow::Result;
use api::{OutputSink, SmoothedSample};
use common::{OutputMode, TrackerConfig};
use generic_udp::GenericUdpSink;
use vrchat::VrchatOscSink;

pub enum OutputBackend {
    VRChat(Box<VrchatOscSink>),
    Generic(GenericUdpSink),
}

impl OutputSink for OutputBackend {
    fn initialize(&mut self) -> Result<()> {
        match self {
            Self::VRChat(s) => s.initialize(),
            Self::Generic(s) => s.initialize(),
        }
    }

    fn send(&mut self, sample: &SmoothedSample) -> Result<()> {
        match self {
            Self::VRChat(s) => s.send(sample),
            Self::Generic(s) => s.send(sample),
        }
    }
}

pub fn create_sink(config: &TrackerConfig) -> OutputBackend {
    match config.output.mode {
        OutputMode::Generic => OutputBackend::Generic(GenericUdpSink::new(format!(
            "{}:{}",
            config.output.send_address, config.output.send_port
        ))),
        OutputMode::VRChat => OutputBackend::VRChat(Box::new(VrchatOscSink::from_config(config))),
    }
}
