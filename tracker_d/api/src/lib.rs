mod layout;
pub use layout::{AnchorKind, ChannelLayout, ChannelSpec, FaceShape, MAX_CHANNELS};

use anyhow::Result;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceRole {
    #[serde(alias = "left", alias = "left_eye", alias = "Left")]
    LeftEye,
    #[serde(alias = "right", alias = "right_eye", alias = "Right")]
    RightEye,
    #[serde(alias = "face")]
    Face,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 3] = [DeviceRole::LeftEye, DeviceRole::RightEye, DeviceRole::Face];

    /// Device type code carried in every telemetry frame.
    pub fn wire_code(self) -> u8 {
        match self {
            DeviceRole::Face => 1,
            DeviceRole::LeftEye => 2,
            DeviceRole::RightEye => 3,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeviceRole::Face),
            2 => Some(DeviceRole::LeftEye),
            3 => Some(DeviceRole::RightEye),
            _ => None,
        }
    }

    pub fn is_eye(self) -> bool {
        matches!(self, DeviceRole::LeftEye | DeviceRole::RightEye)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRole::LeftEye => "left_eye",
            DeviceRole::RightEye => "right_eye",
            DeviceRole::Face => "face",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left_eye" | "lefteye" | "left" => Some(DeviceRole::LeftEye),
            "right_eye" | "righteye" | "right" => Some(DeviceRole::RightEye),
            "face" => Some(DeviceRole::Face),
            _ => None,
        }
    }

    /// Slot index for fixed per-role tables.
    pub fn index(self) -> usize {
        match self {
            DeviceRole::LeftEye => 0,
            DeviceRole::RightEye => 1,
            DeviceRole::Face => 2,
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportKind {
    #[default]
    #[serde(alias = "serial", alias = "USB", alias = "usb")]
    Serial,
    #[serde(alias = "wifi", alias = "WiFi", alias = "WIFI")]
    Wifi,
}

/// Who a session talks to and how. Fixed for the lifetime of a session;
/// changing any field means tearing the session down and creating a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub role: DeviceRole,
    pub transport: TransportKind,
    /// Serial port path (`/dev/ttyUSB0`, `COM3`) or `ip:port`.
    pub address: String,
}

impl DeviceIdentity {
    pub fn new(role: DeviceRole, transport: TransportKind, address: impl Into<String>) -> Self {
        Self {
            role,
            transport,
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {:?} at {}", self.role, self.transport, self.address)
    }
}

/// One decoded telemetry frame, before calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub role: DeviceRole,
    pub sequence: u32,
    /// Host receive time, microseconds since the Unix epoch.
    pub timestamp_us: u64,
    pub values: Vec<f32>,
    /// 0..=100, `None` when the device does not report it.
    pub battery: Option<u8>,
    pub link_quality: Option<u8>,
}

/// Calibrated and filtered output for one input frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedSample {
    pub role: DeviceRole,
    pub sequence: u32,
    pub timestamp_us: u64,
    pub values: Vec<f32>,
    /// Bit `i` set: channel `i` had no valid calibration anchors and was
    /// passed through unnormalized.
    #[serde(default)]
    pub passthrough_mask: u64,
}

impl SmoothedSample {
    pub fn is_passthrough(&self, channel: usize) -> bool {
        channel < 64 && self.passthrough_mask & (1u64 << channel) != 0
    }

    pub fn value(&self, channel: usize) -> Option<f32> {
        self.values.get(channel).copied()
    }

    pub fn eye(&self, layout: &ChannelLayout) -> Option<EyeFrame> {
        EyeFrame::from_values(&self.values, layout)
    }
}

/// Eye-specific view over a sample vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeFrame {
    pub openness: f32,
    pub gaze: Vec2,
}

impl EyeFrame {
    pub fn from_values(values: &[f32], layout: &ChannelLayout) -> Option<Self> {
        let (lid, x, y) = layout.eye_indices()?;
        Some(Self {
            openness: *values.get(lid)?,
            gaze: Vec2::new(*values.get(x)?, *values.get(y)?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationKind {
    /// Eyes held wide open.
    Open,
    /// Eyes held closed.
    Closed,
    /// Looking straight ahead.
    Center,
    /// Looking around to the extremes.
    Range,
    /// Relaxed face.
    Neutral,
    /// Cycling through expressions.
    Expressive,
}

impl CalibrationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" | "close" => Some(Self::Closed),
            "center" | "centre" => Some(Self::Center),
            "range" => Some(Self::Range),
            "neutral" => Some(Self::Neutral),
            "expressive" => Some(Self::Expressive),
            _ => None,
        }
    }

    pub fn applies_to(self, role: DeviceRole) -> bool {
        match self {
            Self::Open | Self::Closed | Self::Center | Self::Range => role.is_eye(),
            Self::Neutral | Self::Expressive => role == DeviceRole::Face,
        }
    }
}

/// Presentation-facing snapshot of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub role: DeviceRole,
    pub address: String,
    pub connection: ConnectionStatus,
    pub battery: Option<u8>,
    pub link_quality: Option<u8>,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    /// Output samples replaced by newer ones before the sink read them.
    pub samples_superseded: u64,
    pub needs_calibration: bool,
    pub calibrating: Option<CalibrationKind>,
    pub filter_enabled: bool,
    pub last_error: Option<String>,
}

impl DeviceStatus {
    pub fn new(identity: &DeviceIdentity) -> Self {
        Self {
            role: identity.role,
            address: identity.address.clone(),
            connection: ConnectionStatus::Disconnected,
            battery: None,
            link_quality: None,
            frames_received: 0,
            frames_dropped: 0,
            frames_rejected: 0,
            samples_superseded: 0,
            needs_calibration: true,
            calibrating: None,
            filter_enabled: true,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub devices: Vec<DeviceStatus>,
}

impl StatusSnapshot {
    pub fn device(&self, role: DeviceRole) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.role == role)
    }
}

/// Consumer of the merged output stream (the avatar bridge).
pub trait OutputSink: Send {
    fn initialize(&mut self) -> Result<()>;
    fn send(&mut self, sample: &SmoothedSample) -> Result<()>;
}
