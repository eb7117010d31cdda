use crate::config::{OpennessCompensation, ShapingConfig, TrackerConfig};
use crate::mutation_trait::{Frame, Mutation};
use api::{AnchorKind, ChannelLayout, DeviceRole};
use anyhow::Result;
use log::warn;

/// Per-channel gain and offset plus outward-gaze openness compensation.
pub struct ShapingMutation {
    layout: ChannelLayout,
    gain: Vec<f32>,
    offset: Vec<f32>,
    compensation: Option<OpennessCompensation>,
    identity: bool,
}

impl ShapingMutation {
    pub fn new(layout: &ChannelLayout, config: &ShapingConfig) -> Self {
        let mut shaping = Self {
            layout: layout.clone(),
            gain: vec![1.0; layout.len()],
            offset: vec![0.0; layout.len()],
            compensation: None,
            identity: true,
        };
        shaping.apply_config(config);
        shaping
    }

    fn apply_config(&mut self, config: &ShapingConfig) {
        self.gain.iter_mut().for_each(|g| *g = 1.0);
        self.offset.iter_mut().for_each(|o| *o = 0.0);

        for (name, amp) in &config.gain {
            match self.layout.index_of(name) {
                Some(i) => self.gain[i] = 1.0 + *amp as f32 * 0.02,
                None => warn!("{}: gain for unknown channel {}", self.layout.role, name),
            }
        }
        for (name, offset) in &config.offset {
            match self.layout.index_of(name) {
                Some(i) => self.offset[i] = *offset,
                None => warn!("{}: offset for unknown channel {}", self.layout.role, name),
            }
        }
        self.compensation = if self.layout.role.is_eye() {
            config.openness_compensation.clone()
        } else {
            None
        };
        self.identity = config.is_identity();
    }

    fn range(anchor: AnchorKind) -> (f32, f32) {
        match anchor {
            AnchorKind::Centered => (-1.0, 1.0),
            AnchorKind::OpenClosed | AnchorKind::NeutralExpressive => (0.0, 1.0),
        }
    }

    fn compensate(&self, frame: &mut Frame, comp: &OpennessCompensation) {
        let Some((lid, x, _)) = self.layout.eye_indices() else {
            return;
        };
        let raw = |i: usize| i < 64 && frame.passthrough_mask & (1u64 << i) != 0;
        if raw(lid) || raw(x) {
            return;
        }
        let (Some(&openness), Some(&gaze_x)) = (frame.values.get(lid), frame.values.get(x)) else {
            return;
        };
        let outward = match self.layout.role {
            DeviceRole::LeftEye => -gaze_x,
            DeviceRole::RightEye => gaze_x,
            DeviceRole::Face => return,
        };
        if outward > 0.0 {
            let boost = (outward * comp.coefficient).min(comp.max);
            frame.values[lid] = (openness + boost).min(1.0);
        }
    }
}

impl Mutation for ShapingMutation {
    fn initialize(&mut self, config: &TrackerConfig) -> Result<()> {
        self.apply_config(&config.shaping_for(self.layout.role));
        Ok(())
    }

    fn mutate(&mut self, frame: &mut Frame, _dt: f32) {
        if self.identity {
            return;
        }

        for (i, value) in frame.values.iter_mut().enumerate() {
            // Raw passthrough values have no known range to shape into.
            if i < 64 && frame.passthrough_mask & (1u64 << i) != 0 {
                continue;
            }
            let (Some(gain), Some(offset), Some(anchor)) =
                (self.gain.get(i), self.offset.get(i), self.layout.anchor(i))
            else {
                continue;
            };
            if *gain == 1.0 && *offset == 0.0 {
                continue;
            }
            let (lo, hi) = Self::range(anchor);
            *value = (*value * gain + offset).clamp(lo, hi);
        }

        if let Some(comp) = self.compensation.clone() {
            self.compensate(frame, &comp);
        }
    }

    fn name(&self) -> &str {
        "Shaping"
    }
}
