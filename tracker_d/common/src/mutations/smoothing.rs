use crate::config::TrackerConfig;
use crate::kalman_filter::{KalmanBank, KalmanParams};
use crate::mutation_trait::{Frame, Mutation};
use anyhow::{bail, Result};
use log::debug;

pub struct SmoothingMutation {
    bank: KalmanBank,
    enabled: bool,
}

impl SmoothingMutation {
    pub fn new(channels: usize, params: KalmanParams, enabled: bool) -> Self {
        Self {
            bank: KalmanBank::new(channels, params),
            enabled,
        }
    }

    pub fn bank(&self) -> &KalmanBank {
        &self.bank
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggling starts the filters over from the next measurement.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.bank.reset();
            self.enabled = enabled;
            debug!("Smoothing {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn set_params(&mut self, params: KalmanParams) {
        self.bank.set_params(params);
    }
}

impl Mutation for SmoothingMutation {
    fn initialize(&mut self, config: &TrackerConfig) -> Result<()> {
        let params = config.filter.params();
        if let Err(e) = params.validate() {
            bail!("invalid filter parameters: {}", e);
        }
        self.set_params(params);
        self.set_enabled(config.filter.enabled);
        Ok(())
    }

    fn mutate(&mut self, frame: &mut Frame, _dt: f32) {
        if self.enabled {
            self.bank.update(&mut frame.values);
        }
    }

    fn name(&self) -> &str {
        "Smoothing"
    }

    fn reset(&mut self) {
        self.bank.reset();
    }
}
