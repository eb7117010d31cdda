use api::{ChannelLayout, ChannelSpec, DeviceIdentity, DeviceRole, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::kalman_filter::KalmanParams;

/// Two eyes, or one face device.
pub const MAX_DEVICES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum OutputMode {
    #[serde(alias = "VRChat", alias = "VRChatOSC", alias = "OSC", alias = "osc")]
    #[default]
    VRChat,
    #[serde(alias = "Generic", alias = "GenericUDP", alias = "udp")]
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub role: DeviceRole,
    #[serde(default)]
    pub transport: TransportKind,
    pub address: String,
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.role, self.transport, self.address.clone())
    }
}

/// Default Kalman tuning for every device.
///
/// Tuning changed at runtime is saved with the device's calibration and, on
/// the next start, takes precedence over `dt`/`q`/`r` here. Set
/// `override_stored` to make these values win over what was saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub dt: f32,
    pub q: f32,
    pub r: f32,
    pub override_stored: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let params = KalmanParams::default();
        Self {
            enabled: true,
            dt: params.dt,
            q: params.q,
            r: params.r,
            override_stored: false,
        }
    }
}

impl FilterConfig {
    pub fn params(&self) -> KalmanParams {
        KalmanParams::new(self.dt, self.q, self.r)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Commit refuses windows shorter than this.
    pub min_samples: usize,
    /// Rolling window cap; older samples fall out first.
    pub max_samples: usize,
    /// Commit on its own once a window has run this long.
    pub auto_commit_secs: Option<f32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 2,
            max_samples: 1024,
            auto_commit_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub baud_rate: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub max_scan_bytes: usize,
    pub max_frame_len: usize,
    pub default_wifi_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            connect_timeout_ms: 3000,
            read_timeout_ms: 100,
            heartbeat_timeout_ms: 5000,
            max_scan_bytes: 4096,
            max_frame_len: 1024,
            default_wifi_port: 80,
        }
    }
}

fn default_baud_rate() -> u32 {
    115200
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub output_queue_depth: usize,
    pub auto_reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_queue_depth: 4,
            auto_reconnect: true,
            reconnect_delay_ms: 2000,
            command_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default, alias = "transport_type")]
    pub mode: OutputMode,
    #[serde(default = "default_send_address", alias = "osc_send_address")]
    pub send_address: String,
    #[serde(default = "default_send_port", alias = "osc_send_port")]
    pub send_port: u16,
    #[serde(default = "default_eye_send_port")]
    pub eye_send_port: u16,
    #[serde(default)]
    pub location_prefix: String,
    #[serde(default = "default_eye_location_prefix")]
    pub eye_location_prefix: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,
}

fn default_send_address() -> String {
    "127.0.0.1".to_string()
}

fn default_send_port() -> u16 {
    8888
}

fn default_eye_send_port() -> u16 {
    8889
}

fn default_eye_location_prefix() -> String {
    "/avatar/parameters/v2/".to_string()
}

fn default_multiplier() -> f32 {
    1.0
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            send_address: default_send_address(),
            send_port: default_send_port(),
            eye_send_port: default_eye_send_port(),
            location_prefix: String::new(),
            eye_location_prefix: default_eye_location_prefix(),
            multiplier: default_multiplier(),
        }
    }
}

impl OutputConfig {
    pub fn port_for(&self, role: DeviceRole) -> u16 {
        if role.is_eye() {
            self.eye_send_port
        } else {
            self.send_port
        }
    }

    pub fn prefix_for(&self, role: DeviceRole) -> &str {
        if role.is_eye() {
            &self.eye_location_prefix
        } else {
            &self.location_prefix
        }
    }
}

/// Boost applied to an eye's openness while it looks outward, where the
/// lid reads as more closed than it is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpennessCompensation {
    pub coefficient: f32,
    pub max: f32,
}

impl Default for OpennessCompensation {
    fn default() -> Self {
        Self {
            coefficient: 0.4,
            max: 0.55,
        }
    }
}

/// Per-device output adjustments keyed by channel name. Empty means identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ShapingConfig {
    /// Gain step per channel; the channel is scaled by `1 + 0.02 * gain`.
    pub gain: BTreeMap<String, i32>,
    pub offset: BTreeMap<String, f32>,
    pub openness_compensation: Option<OpennessCompensation>,
}

impl ShapingConfig {
    pub fn is_identity(&self) -> bool {
        self.gain.values().all(|g| *g == 0)
            && self.offset.values().all(|o| *o == 0.0)
            && self.openness_compensation.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub port: u16,
    pub advertise: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8787,
            advertise: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub devices: Vec<DeviceConfig>,
    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
    pub shaping: BTreeMap<DeviceRole, ShapingConfig>,
    /// Channel table overrides; roles without an entry use the firmware default.
    pub layouts: BTreeMap<DeviceRole, Vec<ChannelSpec>>,
    pub control: ControlConfig,
    pub storage_dir: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            filter: FilterConfig::default(),
            calibration: CalibrationConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            output: OutputConfig::default(),
            shaping: BTreeMap::new(),
            layouts: BTreeMap::new(),
            control: ControlConfig::default(),
            storage_dir: PathBuf::from("."),
        }
    }
}

impl TrackerConfig {
    pub fn layout_for(&self, role: DeviceRole) -> ChannelLayout {
        match self.layouts.get(&role) {
            Some(channels) => ChannelLayout::new(role, channels.clone()),
            None => ChannelLayout::for_role(role),
        }
    }

    pub fn shaping_for(&self, role: DeviceRole) -> ShapingConfig {
        self.shaping.get(&role).cloned().unwrap_or_default()
    }

    /// Checks what serde cannot: value ranges, layouts and the device list.
    pub fn validate(&self) -> Result<(), String> {
        self.filter.params().validate()?;
        if self.calibration.min_samples == 0 {
            return Err("calibration.min_samples must be at least 1".to_string());
        }
        if self.calibration.max_samples < self.calibration.min_samples {
            return Err("calibration.max_samples is below min_samples".to_string());
        }
        if self.session.output_queue_depth == 0 {
            return Err("session.output_queue_depth must be at least 1".to_string());
        }
        if !(self.output.multiplier.is_finite() && self.output.multiplier > 0.0) {
            return Err(format!(
                "output.multiplier must be positive, got {}",
                self.output.multiplier
            ));
        }
        for role in self.layouts.keys() {
            self.layout_for(*role).validate()?;
        }
        if self.devices.len() > MAX_DEVICES {
            return Err(format!(
                "{} devices configured, at most {} are supported",
                self.devices.len(),
                MAX_DEVICES
            ));
        }
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.role == device.role) {
                return Err(format!("device role {} is configured twice", device.role));
            }
        }
        Ok(())
    }
}
