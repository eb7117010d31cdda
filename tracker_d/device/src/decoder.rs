//! Telemetry body layout (little endian):
//!
//! `role: u8 | sequence: u32 | battery: u8 | link: u8 | count: u8 |
//!  values: count x f32 | checksum: u8`
//!
//! The checksum is the XOR of every preceding body byte. Battery and link
//! quality above 100 (the firmware sends 0xFF) mean "not reported".

use api::{DeviceRole, RawSample};
use common::DecodeError;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::transport::frame_body;

const FIXED_LEN: usize = 9;
const VALUES_OFFSET: usize = 8;

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Builds a telemetry body. Values beyond 255 are cut off.
pub fn encode_body(
    role: DeviceRole,
    sequence: u32,
    battery: Option<u8>,
    link_quality: Option<u8>,
    values: &[f32],
) -> Vec<u8> {
    let values = &values[..values.len().min(u8::MAX as usize)];
    let mut body = Vec::with_capacity(FIXED_LEN + values.len() * 4);
    body.push(role.wire_code());
    body.extend_from_slice(&sequence.to_le_bytes());
    body.push(battery.unwrap_or(0xFF));
    body.push(link_quality.unwrap_or(0xFF));
    body.push(values.len() as u8);
    for v in values {
        body.extend_from_slice(&v.to_le_bytes());
    }
    body.push(checksum(&body));
    body
}

/// A complete wire frame, as a device would send it.
pub fn encode_frame(
    role: DeviceRole,
    sequence: u32,
    battery: Option<u8>,
    link_quality: Option<u8>,
    values: &[f32],
) -> Vec<u8> {
    frame_body(&encode_body(role, sequence, battery, link_quality, values))
}

pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn percent(byte: u8) -> Option<u8> {
    (byte <= 100).then_some(byte)
}

/// Per-session decoder. The only state is the sequence tracking used for
/// drop statistics; it never rejects a frame.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    role: DeviceRole,
    channels: usize,
    last_sequence: Option<u32>,
    dropped_frames: u64,
    out_of_order_frames: u64,
}

impl TelemetryDecoder {
    pub fn new(role: DeviceRole, channels: usize) -> Self {
        Self {
            role,
            channels,
            last_sequence: None,
            dropped_frames: 0,
            out_of_order_frames: 0,
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn out_of_order_frames(&self) -> u64 {
        self.out_of_order_frames
    }

    /// Forget the last sequence number, e.g. after a reconnect.
    pub fn reset_sequence(&mut self) {
        self.last_sequence = None;
    }

    pub fn decode(&mut self, body: &[u8]) -> Result<RawSample, DecodeError> {
        self.decode_at(body, now_us())
    }

    pub fn decode_at(&mut self, body: &[u8], timestamp_us: u64) -> Result<RawSample, DecodeError> {
        if body.len() < FIXED_LEN {
            return Err(DecodeError::Malformed(format!(
                "{} bytes is shorter than the {} byte header",
                body.len(),
                FIXED_LEN
            )));
        }

        let count = body[7] as usize;
        let expected = FIXED_LEN + count * 4;
        if body.len() != expected {
            return Err(DecodeError::Malformed(format!(
                "{} values need {} bytes, got {}",
                count,
                expected,
                body.len()
            )));
        }

        let (payload, trailer) = body.split_at(body.len() - 1);
        let computed = checksum(payload);
        if computed != trailer[0] {
            return Err(DecodeError::Corrupt(format!(
                "checksum {:#04x} != {:#04x}",
                computed, trailer[0]
            )));
        }

        let role = DeviceRole::from_wire(body[0])
            .ok_or_else(|| DecodeError::Malformed(format!("unknown role code {}", body[0])))?;
        if role != self.role {
            return Err(DecodeError::Malformed(format!(
                "frame from {} on a {} session",
                role, self.role
            )));
        }
        if count != self.channels {
            return Err(DecodeError::Malformed(format!(
                "{} channels, layout has {}",
                count, self.channels
            )));
        }

        let values = payload[VALUES_OFFSET..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<f32>>();
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(DecodeError::Corrupt(format!("channel {} is not finite", i)));
        }

        let sequence = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        self.track_sequence(sequence);

        Ok(RawSample {
            role,
            sequence,
            timestamp_us,
            values,
            battery: percent(body[5]),
            link_quality: percent(body[6]),
        })
    }

    fn track_sequence(&mut self, sequence: u32) {
        if let Some(last) = self.last_sequence {
            let step = sequence.wrapping_sub(last);
            if step == 0 || step > u32::MAX / 2 {
                self.out_of_order_frames += 1;
            } else {
                self.dropped_frames += (step - 1) as u64;
            }
        }
        self.last_sequence = Some(sequence);
    }
}
