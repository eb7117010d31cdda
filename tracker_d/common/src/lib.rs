pub use api::{
    AnchorKind, CalibrationKind, ChannelLayout, ChannelSpec, DeviceIdentity, DeviceRole,
    RawSample, SmoothedSample,
};

mod calibration;
pub mod calibration_engine;
pub mod calibration_manager;
pub mod config;
pub mod error;
mod kalman_filter;
pub mod mutation_trait;
pub mod mutations;
mod mutator;
mod throttle;

pub use calibration::{CalibrationProfile, ChannelAnchors, MIN_RANGE};
pub use calibration_engine::{
    CalibrationCommand, CalibrationEngine, CalibrationOutcome, CalibrationState,
};
pub use calibration_manager::{CalibrationManager, DeviceSettings, MemoryStore, SettingsStore};
pub use config::{OutputMode, TrackerConfig};
pub use error::{
    CalibrationError, ConnectError, DecodeError, PersistenceError, SessionError, TransportError,
};
pub use kalman_filter::{KalmanBank, KalmanFilter, KalmanParams};
pub use mutator::TrackingMutator;
pub use throttle::Throttle;
