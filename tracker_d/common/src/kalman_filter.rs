use serde::{Deserialize, Serialize};

/// Tuning shared by every channel of a device.
///
/// Lower `q` or higher `r` gives smoother, laggier output; higher `q` or
/// lower `r` follows the input more closely and lets more jitter through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanParams {
    /// Time step the process noise is scaled by.
    pub dt: f32,
    /// Process noise.
    pub q: f32,
    /// Measurement noise.
    pub r: f32,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            dt: 1.0,
            q: 0.01,
            r: 0.1,
        }
    }
}

impl KalmanParams {
    pub fn new(dt: f32, q: f32, r: f32) -> Self {
        Self { dt, q, r }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(format!("dt must be positive, got {}", self.dt));
        }
        if !(self.q.is_finite() && self.q >= 0.0) {
            return Err(format!("q must be non-negative, got {}", self.q));
        }
        if !(self.r.is_finite() && self.r > 0.0) {
            return Err(format!("r must be positive, got {}", self.r));
        }
        Ok(())
    }
}

/// Scalar Kalman filter with a constant-value process model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KalmanFilter {
    estimate: f32,
    error_covariance: f32,
    initialized: bool,
}

impl KalmanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter with an explicit prior instead of adopting the first measurement.
    pub fn with_state(estimate: f32, error_covariance: f32) -> Self {
        Self {
            estimate,
            error_covariance,
            initialized: true,
        }
    }

    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    pub fn error_covariance(&self) -> f32 {
        self.error_covariance
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, measurement: f32, params: &KalmanParams) -> f32 {
        if !measurement.is_finite() {
            return self.estimate;
        }

        // First sample after a reset: take it as-is, with the measurement's
        // own variance as the starting uncertainty.
        if !self.initialized {
            self.initialized = true;
            self.estimate = measurement;
            self.error_covariance = params.r;
            return measurement;
        }

        let predicted_covariance = self.error_covariance + params.q * params.dt;
        let gain = predicted_covariance / (predicted_covariance + params.r);
        self.estimate += gain * (measurement - self.estimate);
        self.error_covariance = (1.0 - gain) * predicted_covariance;
        self.estimate
    }
}

/// One filter per channel, indexed by the channel's stable position.
#[derive(Debug, Clone)]
pub struct KalmanBank {
    filters: Vec<KalmanFilter>,
    params: KalmanParams,
}

impl KalmanBank {
    pub fn new(channels: usize, params: KalmanParams) -> Self {
        Self {
            filters: vec![KalmanFilter::new(); channels],
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn params(&self) -> KalmanParams {
        self.params
    }

    /// Applies from the next sample on; estimates are kept.
    pub fn set_params(&mut self, params: KalmanParams) {
        self.params = params;
    }

    pub fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }

    pub fn filter(&self, channel: usize) -> Option<&KalmanFilter> {
        self.filters.get(channel)
    }

    /// Filters `values` in place. Extra values beyond the bank size are left alone.
    pub fn update(&mut self, values: &mut [f32]) {
        let params = self.params;
        for (value, filter) in values.iter_mut().zip(self.filters.iter_mut()) {
            *value = filter.update(*value, &params);
        }
    }
}
