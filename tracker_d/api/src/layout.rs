//! Channel tables: which index of a device's sample vector carries which
//! semantic value. Layouts are injected configuration; the defaults below
//! mirror what the eye and face firmware currently emit.

use serde::{Deserialize, Serialize};

use crate::DeviceRole;

/// Upper bound on channels per device; the passthrough mask is a `u64`.
pub const MAX_CHANNELS: usize = 64;

/// How a channel is anchored during calibration and normalized afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorKind {
    /// Eyelid openness: `min` from a closed-eye window, `max` from an open one.
    OpenClosed,
    /// Signed gaze axis: `center` plus `min`/`max` extremes, output in [-1, 1].
    Centered,
    /// Face blendshape: relaxed `neutral` baseline and observed `expressive` peak.
    NeutralExpressive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub anchor: AnchorKind,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, anchor: AnchorKind) -> Self {
        Self {
            name: name.into(),
            anchor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub role: DeviceRole,
    pub channels: Vec<ChannelSpec>,
}

impl ChannelLayout {
    pub fn new(role: DeviceRole, channels: Vec<ChannelSpec>) -> Self {
        Self { role, channels }
    }

    /// Default table for a role.
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::LeftEye => Self::eye(role, "Left"),
            DeviceRole::RightEye => Self::eye(role, "Right"),
            DeviceRole::Face => Self::new(
                role,
                FaceShape::ALL
                    .iter()
                    .map(|s| ChannelSpec::new(s.name(), AnchorKind::NeutralExpressive))
                    .collect(),
            ),
        }
    }

    fn eye(role: DeviceRole, side: &str) -> Self {
        Self::new(
            role,
            vec![
                ChannelSpec::new(format!("EyeLid{}", side), AnchorKind::OpenClosed),
                ChannelSpec::new(format!("Eye{}X", side), AnchorKind::Centered),
                ChannelSpec::new(format!("Eye{}Y", side), AnchorKind::Centered),
            ],
        )
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn anchor(&self, index: usize) -> Option<AnchorKind> {
        self.channels.get(index).map(|c| c.anchor)
    }

    /// Channel indices of (openness, gaze x, gaze y): the first `OpenClosed`
    /// channel and the first two `Centered` channels.
    pub fn eye_indices(&self) -> Option<(usize, usize, usize)> {
        let lid = self
            .channels
            .iter()
            .position(|c| c.anchor == AnchorKind::OpenClosed)?;
        let mut centered = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.anchor == AnchorKind::Centered)
            .map(|(i, _)| i);
        let x = centered.next()?;
        let y = centered.next()?;
        Some((lid, x, y))
    }

    /// A usable layout has 1..=MAX_CHANNELS channels and unique names.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() {
            return Err(format!("{} layout has no channels", self.role));
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(format!(
                "{} layout has {} channels (max {})",
                self.role,
                self.channels.len(),
                MAX_CHANNELS
            ));
        }
        for (i, c) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|o| o.name == c.name) {
                return Err(format!("{} layout repeats channel {}", self.role, c.name));
            }
        }
        Ok(())
    }
}

/// Blendshapes produced by the face tracker, in firmware output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FaceShape {
    // Cheek
    CheekPuffLeft = 0,
    CheekPuffRight,
    CheekSuckLeft,
    CheekSuckRight,

    // Jaw
    JawOpen,
    JawForward,
    JawLeft,
    JawRight,

    // Nose
    NoseSneerLeft,
    NoseSneerRight,

    // Mouth
    MouthFunnel,
    MouthPucker,
    MouthLeft,
    MouthRight,
    MouthRollUpper,
    MouthRollLower,
    MouthShrugUpper,
    MouthShrugLower,
    MouthClose,
    MouthSmileLeft,
    MouthSmileRight,
    MouthFrownLeft,
    MouthFrownRight,
    MouthDimpleLeft,
    MouthDimpleRight,
    MouthUpperUpLeft,
    MouthUpperUpRight,
    MouthLowerDownLeft,
    MouthLowerDownRight,
    MouthPressLeft,
    MouthPressRight,
    MouthStretchLeft,
    MouthStretchRight,

    // Tongue
    TongueOut,
    TongueUp,
    TongueDown,
    TongueLeft,
    TongueRight,
    TongueRoll,
    TongueBendDown,
    TongueCurlUp,
    TongueSquish,
    TongueFlat,
    TongueTwistLeft,
    TongueTwistRight,

    Max,
}

impl FaceShape {
    pub const ALL: [FaceShape; FaceShape::Max as usize] = [
        FaceShape::CheekPuffLeft,
        FaceShape::CheekPuffRight,
        FaceShape::CheekSuckLeft,
        FaceShape::CheekSuckRight,
        FaceShape::JawOpen,
        FaceShape::JawForward,
        FaceShape::JawLeft,
        FaceShape::JawRight,
        FaceShape::NoseSneerLeft,
        FaceShape::NoseSneerRight,
        FaceShape::MouthFunnel,
        FaceShape::MouthPucker,
        FaceShape::MouthLeft,
        FaceShape::MouthRight,
        FaceShape::MouthRollUpper,
        FaceShape::MouthRollLower,
        FaceShape::MouthShrugUpper,
        FaceShape::MouthShrugLower,
        FaceShape::MouthClose,
        FaceShape::MouthSmileLeft,
        FaceShape::MouthSmileRight,
        FaceShape::MouthFrownLeft,
        FaceShape::MouthFrownRight,
        FaceShape::MouthDimpleLeft,
        FaceShape::MouthDimpleRight,
        FaceShape::MouthUpperUpLeft,
        FaceShape::MouthUpperUpRight,
        FaceShape::MouthLowerDownLeft,
        FaceShape::MouthLowerDownRight,
        FaceShape::MouthPressLeft,
        FaceShape::MouthPressRight,
        FaceShape::MouthStretchLeft,
        FaceShape::MouthStretchRight,
        FaceShape::TongueOut,
        FaceShape::TongueUp,
        FaceShape::TongueDown,
        FaceShape::TongueLeft,
        FaceShape::TongueRight,
        FaceShape::TongueRoll,
        FaceShape::TongueBendDown,
        FaceShape::TongueCurlUp,
        FaceShape::TongueSquish,
        FaceShape::TongueFlat,
        FaceShape::TongueTwistLeft,
        FaceShape::TongueTwistRight,
    ];

    /// Parameter name as the avatar bridge expects it (`cheekPuffLeft`, ...).
    pub fn name(&self) -> String {
        let debug = format!("{:?}", self);
        let mut chars = debug.chars();
        match chars.next() {
            Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
            None => debug,
        }
    }
}

impl TryFrom<usize> for FaceShape {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::ALL.get(value).copied().ok_or(())
    }
}
