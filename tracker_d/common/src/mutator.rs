use anyhow::Result;
use api::{CalibrationKind, ChannelLayout, RawSample, SmoothedSample};
use log::info;

use crate::calibration::CalibrationProfile;
use crate::calibration_engine::{CalibrationCommand, CalibrationEngine, CalibrationOutcome};
use crate::calibration_manager::DeviceSettings;
use crate::config::TrackerConfig;
use crate::error::CalibrationError;
use crate::kalman_filter::KalmanParams;
use crate::mutation_trait::{Frame, Mutation};
use crate::mutations::{NormalizationMutation, ShapingMutation, SmoothingMutation};

/// Everything between a decoded sample and the output stream for one device:
/// calibration observe, normalization, smoothing and shaping, in that order.
pub struct TrackingMutator {
    layout: ChannelLayout,
    engine: CalibrationEngine,
    normalization: NormalizationMutation,
    smoothing: SmoothingMutation,
    shaping: ShapingMutation,
    keep_config_tuning: bool,
}

impl TrackingMutator {
    pub fn new(layout: ChannelLayout, config: &TrackerConfig) -> Self {
        let role = layout.role;
        Self {
            engine: CalibrationEngine::new(layout.clone(), config.calibration.clone()),
            normalization: NormalizationMutation::new(&layout),
            smoothing: SmoothingMutation::new(
                layout.len(),
                config.filter.params(),
                config.filter.enabled,
            ),
            shaping: ShapingMutation::new(&layout, &config.shaping_for(role)),
            keep_config_tuning: config.filter.override_stored,
            layout,
        }
    }

    fn stages_mut(&mut self) -> [&mut dyn Mutation; 3] {
        [
            &mut self.normalization,
            &mut self.smoothing,
            &mut self.shaping,
        ]
    }

    /// Re-reads filter and shaping settings. Calibration is left alone.
    pub fn initialize(&mut self, config: &TrackerConfig) -> Result<()> {
        for stage in self.stages_mut() {
            stage.initialize(config)?;
        }
        Ok(())
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn profile(&self) -> &CalibrationProfile {
        self.engine.profile()
    }

    pub fn collecting(&self) -> Option<CalibrationKind> {
        self.engine.collecting()
    }

    pub fn needs_calibration(&self) -> bool {
        !self.engine.profile().is_complete(&self.layout)
    }

    pub fn filter_enabled(&self) -> bool {
        self.smoothing.is_enabled()
    }

    pub fn kalman_params(&self) -> KalmanParams {
        self.smoothing.bank().params()
    }

    pub fn smoothing(&self) -> &SmoothingMutation {
        &self.smoothing
    }

    /// Runs one sample through the pipeline. The second value is set when an
    /// automatic calibration commit fired on this sample.
    pub fn process(
        &mut self,
        raw: &RawSample,
        dt: f32,
    ) -> (
        SmoothedSample,
        Option<Result<CalibrationOutcome, CalibrationError>>,
    ) {
        let auto_commit = self.engine.observe(&raw.values, dt);
        if let Some(Ok(_)) = &auto_commit {
            self.profile_changed();
        }

        let mut frame = Frame::new(raw.values.clone());
        for stage in self.stages_mut() {
            stage.mutate(&mut frame, dt);
        }

        #[cfg(feature = "xtralog")]
        log::trace!(
            "{} #{}: {:?} -> {:?}",
            raw.role,
            raw.sequence,
            raw.values,
            frame.values
        );

        let sample = SmoothedSample {
            role: raw.role,
            sequence: raw.sequence,
            timestamp_us: raw.timestamp_us,
            values: frame.values,
            passthrough_mask: frame.passthrough_mask,
        };
        (sample, auto_commit)
    }

    pub fn calibrate(
        &mut self,
        command: CalibrationCommand,
    ) -> Result<Option<CalibrationOutcome>, CalibrationError> {
        let outcome = self.engine.handle(command)?;
        if outcome.is_some() {
            self.profile_changed();
        }
        Ok(outcome)
    }

    /// Drops an open calibration window, if any.
    pub fn abort_calibration(&mut self) {
        if self.engine.collecting().is_some() {
            let _ = self.engine.cancel();
        }
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.smoothing.set_enabled(enabled);
    }

    pub fn set_kalman_params(&mut self, params: KalmanParams) -> Result<(), String> {
        params.validate()?;
        self.smoothing.set_params(params);
        Ok(())
    }

    /// Installs stored settings. Returns false when the stored profile was
    /// made for a different channel table and was ignored. Stored tuning is
    /// skipped when the config sets `filter.override_stored`.
    pub fn load_settings(&mut self, settings: DeviceSettings) -> bool {
        if let Some(params) = settings.kalman.filter(|_| !self.keep_config_tuning) {
            if params.validate().is_ok() {
                self.smoothing.set_params(params);
            }
        }
        if !self.engine.load_profile(settings.profile) {
            return false;
        }
        info!("{}: calibration profile loaded", self.layout.role);
        self.profile_changed();
        true
    }

    pub fn settings(&self) -> DeviceSettings {
        DeviceSettings {
            profile: self.engine.profile().clone(),
            kalman: Some(self.smoothing.bank().params()),
        }
    }

    // A new mapping invalidates every channel's filter history.
    fn profile_changed(&mut self) {
        self.normalization
            .set_profile(self.engine.profile().clone());
        self.smoothing.reset();
    }
}
