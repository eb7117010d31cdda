//! Calibration state machine for one device.
//!
//! `Idle -> Collecting -> Idle`. A window of raw samples is collected for one
//! [`CalibrationKind`] and reduced to a per-channel statistic on commit. The
//! profile is replaced in one step, only when every affected channel ends up
//! consistent; otherwise nothing changes.

use api::{AnchorKind, CalibrationKind, ChannelLayout, DeviceRole};
use log::{debug, info};
use serde::Serialize;
use std::collections::VecDeque;

use crate::calibration::{CalibrationProfile, ChannelAnchors, MIN_RANGE};
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    Start(CalibrationKind),
    Cancel,
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Idle,
    Collecting {
        kind: CalibrationKind,
        window: VecDeque<Vec<f32>>,
        /// Seconds since the window was opened.
        elapsed: f32,
    },
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub kind: CalibrationKind,
    pub samples: usize,
    /// Channels whose anchors were written.
    pub changed: Vec<usize>,
}

/// Which anchors a calibration kind writes, and to which channels.
fn target_anchor(kind: CalibrationKind) -> AnchorKind {
    match kind {
        CalibrationKind::Open | CalibrationKind::Closed => AnchorKind::OpenClosed,
        CalibrationKind::Center | CalibrationKind::Range => AnchorKind::Centered,
        CalibrationKind::Neutral | CalibrationKind::Expressive => AnchorKind::NeutralExpressive,
    }
}

pub struct CalibrationEngine {
    role: DeviceRole,
    layout: ChannelLayout,
    config: CalibrationConfig,
    state: CalibrationState,
    profile: CalibrationProfile,
}

impl CalibrationEngine {
    pub fn new(layout: ChannelLayout, config: CalibrationConfig) -> Self {
        let profile = CalibrationProfile::uncalibrated(layout.len());
        Self {
            role: layout.role,
            layout,
            config,
            state: CalibrationState::Idle,
            profile,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn collecting(&self) -> Option<CalibrationKind> {
        match &self.state {
            CalibrationState::Collecting { kind, .. } => Some(*kind),
            CalibrationState::Idle => None,
        }
    }

    pub fn window_len(&self) -> usize {
        match &self.state {
            CalibrationState::Collecting { window, .. } => window.len(),
            CalibrationState::Idle => 0,
        }
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Installs a stored profile. Rejected when it was made for a different
    /// channel table.
    pub fn load_profile(&mut self, profile: CalibrationProfile) -> bool {
        if profile.len() != self.layout.len() {
            return false;
        }
        self.profile = profile;
        true
    }

    pub fn handle(
        &mut self,
        command: CalibrationCommand,
    ) -> Result<Option<CalibrationOutcome>, CalibrationError> {
        match command {
            CalibrationCommand::Start(kind) => self.start(kind).map(|_| None),
            CalibrationCommand::Cancel => self.cancel().map(|_| None),
            CalibrationCommand::Commit => self.commit().map(Some),
        }
    }

    pub fn start(&mut self, kind: CalibrationKind) -> Result<(), CalibrationError> {
        if let Some(current) = self.collecting() {
            return Err(CalibrationError::AlreadyCalibrating(current));
        }
        if !kind.applies_to(self.role) {
            return Err(CalibrationError::Unsupported {
                kind,
                role: self.role,
            });
        }
        info!("{}: collecting {:?} calibration", self.role, kind);
        self.state = CalibrationState::Collecting {
            kind,
            window: VecDeque::new(),
            elapsed: 0.0,
        };
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), CalibrationError> {
        match std::mem::replace(&mut self.state, CalibrationState::Idle) {
            CalibrationState::Idle => Err(CalibrationError::NotCalibrating),
            CalibrationState::Collecting { kind, window, .. } => {
                info!(
                    "{}: {:?} calibration cancelled after {} samples",
                    self.role,
                    kind,
                    window.len()
                );
                Ok(())
            }
        }
    }

    /// Feeds one raw sample. Returns the commit result when an automatic
    /// commit fired on this sample.
    pub fn observe(
        &mut self,
        values: &[f32],
        dt: f32,
    ) -> Option<Result<CalibrationOutcome, CalibrationError>> {
        let CalibrationState::Collecting {
            window, elapsed, ..
        } = &mut self.state
        else {
            return None;
        };

        if values.len() != self.layout.len() {
            return None;
        }
        if window.len() >= self.config.max_samples {
            window.pop_front();
        }
        window.push_back(values.to_vec());
        *elapsed += dt.max(0.0);

        let due = match self.config.auto_commit_secs {
            Some(limit) => *elapsed >= limit && window.len() >= self.config.min_samples,
            None => false,
        };
        if due {
            Some(self.commit())
        } else {
            None
        }
    }

    pub fn commit(&mut self) -> Result<CalibrationOutcome, CalibrationError> {
        let (kind, samples) = match &self.state {
            CalibrationState::Idle => return Err(CalibrationError::NotCalibrating),
            CalibrationState::Collecting { kind, window, .. } => {
                if window.len() < self.config.min_samples {
                    return Err(CalibrationError::InsufficientSamples {
                        required: self.config.min_samples,
                        collected: window.len(),
                    });
                }
                (*kind, window.len())
            }
        };

        // The window is consumed from here on, whatever the result.
        let window = match std::mem::replace(&mut self.state, CalibrationState::Idle) {
            CalibrationState::Collecting { window, .. } => window,
            CalibrationState::Idle => VecDeque::new(),
        };

        let (candidate, changed) = self.apply_window(kind, &window)?;
        self.profile = candidate;
        info!(
            "{}: {:?} calibration committed from {} samples ({} channels)",
            self.role,
            kind,
            samples,
            changed.len()
        );
        Ok(CalibrationOutcome {
            kind,
            samples,
            changed,
        })
    }

    fn apply_window(
        &self,
        kind: CalibrationKind,
        window: &VecDeque<Vec<f32>>,
    ) -> Result<(CalibrationProfile, Vec<usize>), CalibrationError> {
        let target = target_anchor(kind);
        let mut candidate = self.profile.clone();
        let mut changed = Vec::new();
        let mut skipped = 0usize;

        for (channel, spec) in self.layout.channels.iter().enumerate() {
            if spec.anchor != target {
                continue;
            }
            let column = window.iter().map(|s| s[channel]);
            let stats = WindowStats::collect(column);
            let mut anchors = candidate.channels[channel];
            apply_statistic(kind, &stats, &mut anchors);

            // Face channels the user never moved keep what they had.
            if kind == CalibrationKind::Expressive {
                if let (Some(n), Some(e)) = (anchors.neutral, anchors.expressive) {
                    if (e - n).abs() < MIN_RANGE {
                        debug!(
                            "{}: {} showed no movement, keeping previous anchor",
                            self.role, spec.name
                        );
                        skipped += 1;
                        continue;
                    }
                }
            }

            if let Some(reason) = anchors.inconsistency(spec.anchor) {
                return Err(CalibrationError::InvalidRange {
                    channel,
                    name: spec.name.clone(),
                    reason,
                });
            }
            candidate.channels[channel] = anchors;
            changed.push(channel);
        }

        if changed.is_empty() && skipped > 0 {
            return Err(CalibrationError::InvalidRange {
                channel: 0,
                name: self.layout.channels[0].name.clone(),
                reason: "no expression was captured on any channel".to_string(),
            });
        }
        Ok((candidate, changed))
    }
}

struct WindowStats {
    min: f32,
    max: f32,
    mean: f32,
}

impl WindowStats {
    fn collect(values: impl Iterator<Item = f32>) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            count += 1;
        }
        let mean = if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        };
        Self { min, max, mean }
    }
}

fn apply_statistic(kind: CalibrationKind, stats: &WindowStats, anchors: &mut ChannelAnchors) {
    match kind {
        CalibrationKind::Open => anchors.max = Some(stats.max),
        CalibrationKind::Closed => anchors.min = Some(stats.min),
        CalibrationKind::Center => anchors.center = Some(stats.mean),
        CalibrationKind::Range => {
            anchors.min = Some(stats.min);
            anchors.max = Some(stats.max);
        }
        CalibrationKind::Neutral => anchors.neutral = Some(stats.mean),
        CalibrationKind::Expressive => anchors.expressive = Some(stats.max),
    }
}
