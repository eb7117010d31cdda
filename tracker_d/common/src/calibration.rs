use api::{AnchorKind, ChannelLayout};
use serde::{Deserialize, Serialize};

/// Ranges narrower than this are treated as missing.
pub const MIN_RANGE: f32 = 1e-4;

/// Calibration reference points for one channel. Which fields matter
/// depends on the channel's [`AnchorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelAnchors {
    #[serde(default)]
    pub min: Option<f32>,
    #[serde(default)]
    pub max: Option<f32>,
    #[serde(default)]
    pub center: Option<f32>,
    #[serde(default)]
    pub neutral: Option<f32>,
    #[serde(default)]
    pub expressive: Option<f32>,
}

impl ChannelAnchors {
    /// Normalized value and whether it had to be passed through raw.
    pub fn normalize(&self, anchor: AnchorKind, raw: f32) -> (f32, bool) {
        match self.normalize_checked(anchor, raw) {
            Some(v) if v.is_finite() => (v, false),
            _ => (raw, true),
        }
    }

    fn normalize_checked(&self, anchor: AnchorKind, raw: f32) -> Option<f32> {
        match anchor {
            AnchorKind::OpenClosed => {
                let (min, max) = (self.min?, self.max?);
                if max - min < MIN_RANGE {
                    return None;
                }
                Some(((raw - min) / (max - min)).clamp(0.0, 1.0))
            }
            AnchorKind::NeutralExpressive => {
                let (neutral, expressive) = (self.neutral?, self.expressive?);
                if (expressive - neutral).abs() < MIN_RANGE {
                    return None;
                }
                Some(((raw - neutral) / (expressive - neutral)).clamp(0.0, 1.0))
            }
            AnchorKind::Centered => {
                let (min, center, max) = (self.min?, self.center?, self.max?);
                if max - center < MIN_RANGE || center - min < MIN_RANGE {
                    return None;
                }
                if raw >= center {
                    Some(((raw - center) / (max - center)).clamp(0.0, 1.0))
                } else {
                    Some(-((center - raw) / (center - min)).clamp(0.0, 1.0))
                }
            }
        }
    }

    /// Usable for normalization under `anchor`.
    pub fn is_valid(&self, anchor: AnchorKind) -> bool {
        self.normalize_checked(anchor, 0.0).is_some()
    }

    /// Anchors present for `anchor` contradict each other.
    pub fn inconsistency(&self, anchor: AnchorKind) -> Option<String> {
        match anchor {
            AnchorKind::OpenClosed | AnchorKind::Centered => {
                if let (Some(min), Some(max)) = (self.min, self.max) {
                    if min >= max {
                        return Some(format!("min {} is not below max {}", min, max));
                    }
                }
                if anchor == AnchorKind::Centered {
                    if let (Some(min), Some(center), Some(max)) = (self.min, self.center, self.max)
                    {
                        if center < min || center > max {
                            return Some(format!(
                                "center {} lies outside [{}, {}]",
                                center, min, max
                            ));
                        }
                    }
                }
                None
            }
            AnchorKind::NeutralExpressive => match (self.neutral, self.expressive) {
                (Some(n), Some(e)) if (e - n).abs() < MIN_RANGE => {
                    Some(format!("expressive {} equals neutral {}", e, n))
                }
                _ => None,
            },
        }
    }

    fn sanitize(&mut self) {
        for field in [
            &mut self.min,
            &mut self.max,
            &mut self.center,
            &mut self.neutral,
            &mut self.expressive,
        ] {
            if matches!(field, Some(v) if !v.is_finite()) {
                *field = None;
            }
        }
    }
}

/// Per-device raw-to-normalized mapping, one entry per layout channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub channels: Vec<ChannelAnchors>,
}

impl CalibrationProfile {
    /// Profile with no anchors; every channel passes through.
    pub fn uncalibrated(channels: usize) -> Self {
        Self {
            channels: vec![ChannelAnchors::default(); channels],
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn anchors(&self, channel: usize) -> Option<&ChannelAnchors> {
        self.channels.get(channel)
    }

    /// True when every channel of `layout` can be normalized.
    pub fn is_complete(&self, layout: &ChannelLayout) -> bool {
        self.channels.len() == layout.len()
            && layout
                .channels
                .iter()
                .zip(&self.channels)
                .all(|(spec, anchors)| anchors.is_valid(spec.anchor))
    }

    /// Drops non-finite anchors so the profile survives a JSON round trip.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        for anchors in &mut out.channels {
            anchors.sanitize();
        }
        out
    }
}
