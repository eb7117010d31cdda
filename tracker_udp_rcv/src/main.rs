use anyhow::{Context, Result};
use api::{ChannelLayout, DeviceRole, SmoothedSample};
use log::{error, info, warn};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};

const DEFAULT_PORT: u16 = 8888;

fn report(sample: &SmoothedSample, src: SocketAddr) {
    if let Some(eye) = sample.eye(&ChannelLayout::for_role(sample.role)) {
        println!(
            "{} #{} from {}: openness {:.3}, gaze ({:.3}, {:.3})",
            sample.role, sample.sequence, src, eye.openness, eye.gaze.x, eye.gaze.y
        );
    } else {
        println!(
            "{} #{} from {}: {:?}",
            sample.role, sample.sequence, src, sample.values
        );
    }
    if sample.passthrough_mask != 0 {
        println!("  uncalibrated channels: {:#x}", sample.passthrough_mask);
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("invalid port {:?}", arg))?,
        None => DEFAULT_PORT,
    };
    let addr = format!("0.0.0.0:{}", port);
    let socket = UdpSocket::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;

    info!("Listening for tracking samples on {}...", addr);

    let mut buf = [0u8; 65535];
    let mut last: HashMap<DeviceRole, SmoothedSample> = HashMap::new();

    loop {
        let (amt, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                error!("Error receiving data: {}", e);
                continue;
            }
        };
        let slice = &buf[..amt];

        match serde_json::from_slice::<SmoothedSample>(slice) {
            Ok(sample) => {
                // Sequence and timestamp change every frame; only report new values.
                let changed = last.get(&sample.role).map_or(true, |prev| {
                    prev.values != sample.values || prev.passthrough_mask != sample.passthrough_mask
                });
                if changed {
                    report(&sample, src);
                }
                last.insert(sample.role, sample);
            }
            Err(e) => {
                warn!("Failed to deserialize packet from {}: {}", src, e);
                if let Ok(s) = std::str::from_utf8(slice) {
                    warn!("Raw data: {}", s);
                }
            }
        }
    }
}
