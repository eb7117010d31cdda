use crate::calibration::CalibrationProfile;
use crate::config::TrackerConfig;
use crate::mutation_trait::{Frame, Mutation};
use crate::throttle::Throttle;
use api::{AnchorKind, ChannelLayout, DeviceRole};
use anyhow::Result;
use log::warn;

fn channel_bit(channel: usize) -> u64 {
    1u64.checked_shl(channel as u32).unwrap_or(0)
}

/// Maps raw channel values into their calibrated range.
pub struct NormalizationMutation {
    role: DeviceRole,
    anchors: Vec<AnchorKind>,
    profile: CalibrationProfile,
    warn_throttle: Throttle,
    last_mask: u64,
}

impl NormalizationMutation {
    pub fn new(layout: &ChannelLayout) -> Self {
        Self {
            role: layout.role,
            anchors: layout.channels.iter().map(|c| c.anchor).collect(),
            profile: CalibrationProfile::uncalibrated(layout.len()),
            warn_throttle: Throttle::default(),
            last_mask: 0,
        }
    }

    pub fn set_profile(&mut self, profile: CalibrationProfile) {
        self.profile = profile;
        self.last_mask = 0;
    }
}

impl Mutation for NormalizationMutation {
    fn initialize(&mut self, _config: &TrackerConfig) -> Result<()> {
        Ok(())
    }

    fn mutate(&mut self, frame: &mut Frame, _dt: f32) {
        let mut mask = 0u64;
        for (i, value) in frame.values.iter_mut().enumerate() {
            let (Some(anchor), Some(anchors)) = (self.anchors.get(i), self.profile.anchors(i))
            else {
                mask |= channel_bit(i);
                continue;
            };
            let (normalized, passthrough) = anchors.normalize(*anchor, *value);
            *value = normalized;
            if passthrough {
                mask |= channel_bit(i);
            }
        }
        frame.passthrough_mask |= mask;

        if mask != 0 && mask != self.last_mask {
            if let Some(suppressed) = self.warn_throttle.ready() {
                warn!(
                    "{}: {} channels uncalibrated, passing raw values through (mask {:#x}, {} repeats hidden)",
                    self.role,
                    mask.count_ones(),
                    mask,
                    suppressed
                );
                self.last_mask = mask;
            }
        }
    }

    fn name(&self) -> &str {
        "Normalization"
    }
}
