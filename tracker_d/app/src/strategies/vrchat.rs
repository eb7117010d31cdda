use anyhow::{anyhow, Context, Result};
use api::{ChannelLayout, DeviceRole, OutputSink, SmoothedSample};
use common::config::OutputConfig;
use common::TrackerConfig;
use log::{error, info};
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscType};
use std::collections::BTreeMap;
use std::net::UdpSocket;

/// Ceiling applied after the multiplier: the largest power of ten not
/// above it.
pub fn clip_limit(multiplier: f32) -> f32 {
    10f32.powf(multiplier.log10().floor())
}

pub fn osc_address(prefix: &str, name: &str) -> String {
    let address = format!("{}{}", prefix, name);
    if address.starts_with('/') {
        address
    } else {
        format!("/{}", address)
    }
}

struct RoleTarget {
    target: String,
    addresses: Vec<String>,
}

/// Sends every sample as one OSC bundle of float messages, one per channel,
/// to the port configured for the sample's role.
pub struct VrchatOscSink {
    socket: Option<UdpSocket>,
    targets: BTreeMap<DeviceRole, RoleTarget>,
    multiplier: f32,
    clip: f32,
}

impl VrchatOscSink {
    pub fn new(output: &OutputConfig, layouts: &[ChannelLayout]) -> Self {
        let targets = layouts
            .iter()
            .map(|layout| {
                let prefix = output.prefix_for(layout.role);
                let target = RoleTarget {
                    target: format!("{}:{}", output.send_address, output.port_for(layout.role)),
                    addresses: layout
                        .channels
                        .iter()
                        .map(|c| osc_address(prefix, &c.name))
                        .collect(),
                };
                (layout.role, target)
            })
            .collect();

        Self {
            socket: None,
            targets,
            multiplier: output.multiplier,
            clip: clip_limit(output.multiplier),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        let layouts: Vec<ChannelLayout> = DeviceRole::ALL
            .iter()
            .map(|role| config.layout_for(*role))
            .collect();
        Self::new(&config.output, &layouts)
    }

    /// Messages for one sample, in channel order.
    pub fn messages(&self, sample: &SmoothedSample) -> Vec<OscMessage> {
        let Some(target) = self.targets.get(&sample.role) else {
            return Vec::new();
        };
        target
            .addresses
            .iter()
            .zip(&sample.values)
            .map(|(addr, value)| OscMessage {
                addr: addr.clone(),
                args: vec![OscType::Float((value * self.multiplier).min(self.clip))],
            })
            .collect()
    }
}

impl OutputSink for VrchatOscSink {
    fn initialize(&mut self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind OSC socket")?;
        self.socket = Some(socket);
        for (role, target) in &self.targets {
            info!("OSC output for {} -> {}", role, target.target);
        }
        Ok(())
    }

    fn send(&mut self, sample: &SmoothedSample) -> Result<()> {
        let messages = self.messages(sample);
        if messages.is_empty() {
            return Ok(());
        }
        let Some(target) = self.targets.get(&sample.role) else {
            return Ok(());
        };

        let packet = OscPacket::Bundle(OscBundle {
            timetag: rosc::OscTime::from((0, 0)),
            content: messages.into_iter().map(OscPacket::Message).collect(),
        });
        let buf = encoder::encode(&packet)?;

        if self.socket.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .map_err(|e| anyhow!("Failed to re-bind OSC socket: {}", e))?;
            info!("Re-bound OSC socket successfully.");
            self.socket = Some(socket);
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("OSC socket not available"))?;

        #[cfg(feature = "xtralog")]
        log::trace!("OSC {} #{} -> {}", sample.role, sample.sequence, target.target);

        if let Err(e) = socket.send_to(&buf, &target.target) {
            error!("Failed to send OSC packet: {}. Re-binding on next send.", e);
            self.socket = None;
            return Err(anyhow!("OSC send failed: {}", e));
        }
        Ok(())
    }
}
