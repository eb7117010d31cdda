//! Error taxonomy for the device pipeline.
//!
//! Decode errors are per-frame and never leave the session; transport errors
//! end a connection; calibration errors go back to whoever issued the
//! command; persistence errors are logged and reported in status.

use api::{CalibrationKind, DeviceRole};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("device at {0} is unreachable: {1}")]
    Unreachable(String, String),
    #[error("connection to {0} timed out")]
    Timeout(String),
    #[error("a {0} session is already connected")]
    AlreadyConnected(DeviceRole),
    #[error("invalid device identity: {0}")]
    InvalidIdentity(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("lost frame sync: skipped {skipped} bytes without a valid frame")]
    Desync { skipped: usize },
    #[error("no data received for {0} ms")]
    HeartbeatTimeout(u64),
    #[error("device closed the connection")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("corrupt frame: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("{0:?} calibration is already in progress")]
    AlreadyCalibrating(CalibrationKind),
    #[error("no calibration in progress")]
    NotCalibrating,
    #[error("insufficient samples: collected {collected}, required {required}")]
    InsufficientSamples { required: usize, collected: usize },
    #[error("invalid range on channel {channel} ({name}): {reason}")]
    InvalidRange {
        channel: usize,
        name: String,
        reason: String,
    },
    #[error("{kind:?} calibration does not apply to {role}")]
    Unsupported {
        kind: CalibrationKind,
        role: DeviceRole,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to load settings for {role}: {reason}")]
    Load { role: DeviceRole, reason: String },
    #[error("failed to save settings for {role}: {reason}")]
    Save { role: DeviceRole, reason: String },
}

/// Failures of commands routed to a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no {0} session")]
    NoSession(DeviceRole),
    #[error("{0} session has stopped")]
    Closed(DeviceRole),
    #[error("{0} session did not answer in time")]
    Timeout(DeviceRole),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("invalid filter parameters: {0}")]
    InvalidParams(String),
}
