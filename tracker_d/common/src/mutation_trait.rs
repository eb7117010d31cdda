use crate::config::TrackerConfig;
use anyhow::Result;

/// Values of one sample as they move through the per-device stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub values: Vec<f32>,
    /// Bit `i`: channel `i` was passed through without normalization.
    pub passthrough_mask: u64,
}

impl Frame {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            passthrough_mask: 0,
        }
    }
}

pub trait Mutation: Send {
    /// Re-read tunables from configuration.
    fn initialize(&mut self, config: &TrackerConfig) -> Result<()>;

    /// Process the frame in place.
    fn mutate(&mut self, frame: &mut Frame, dt: f32);

    /// Stage name used in logs ("Normalization", "Smoothing", ...).
    fn name(&self) -> &str;

    /// Forget per-channel history.
    fn reset(&mut self) {}
}
