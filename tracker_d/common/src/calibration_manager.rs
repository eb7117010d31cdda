use api::DeviceRole;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::calibration::CalibrationProfile;
use crate::error::PersistenceError;
use crate::kalman_filter::KalmanParams;

/// What is kept per device between runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub profile: CalibrationProfile,
    #[serde(default)]
    pub kalman: Option<KalmanParams>,
}

impl DeviceSettings {
    fn sanitized(&self) -> Self {
        let kalman = self.kalman.filter(|k| k.validate().is_ok());
        Self {
            profile: self.profile.sanitized(),
            kalman,
        }
    }
}

/// Persistence for calibration profiles and filter tuning, keyed by role.
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing was stored yet.
    fn load(&self, role: DeviceRole) -> Result<Option<DeviceSettings>, PersistenceError>;
    fn save(&self, role: DeviceRole, settings: &DeviceSettings) -> Result<(), PersistenceError>;
}

/// JSON files under a storage directory, one per role.
pub struct CalibrationManager {
    storage_dir: PathBuf,
}

impl CalibrationManager {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self { storage_dir }
    }

    pub fn path_for(&self, role: DeviceRole) -> PathBuf {
        self.storage_dir.join(format!("calibration_{}.json", role.as_str()))
    }

    fn ensure_dir(dir: &Path) -> std::io::Result<()> {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl SettingsStore for CalibrationManager {
    fn load(&self, role: DeviceRole) -> Result<Option<DeviceSettings>, PersistenceError> {
        let path = self.path_for(role);
        if !path.exists() {
            info!("No calibration file found at {:?}, starting uncalibrated", path);
            return Ok(None);
        }

        let load_err = |reason: String| PersistenceError::Load { role, reason };
        let file = File::open(&path).map_err(|e| load_err(format!("{:?}: {}", path, e)))?;
        let settings: DeviceSettings = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| load_err(format!("{:?}: {}", path, e)))?;

        info!("Loaded calibration data from {:?}", path);
        Ok(Some(settings))
    }

    fn save(&self, role: DeviceRole, settings: &DeviceSettings) -> Result<(), PersistenceError> {
        let path = self.path_for(role);
        let save_err = |reason: String| PersistenceError::Save { role, reason };

        Self::ensure_dir(&self.storage_dir)
            .map_err(|e| save_err(format!("create {:?}: {}", self.storage_dir, e)))?;
        let file = File::create(&path).map_err(|e| save_err(format!("{:?}: {}", path, e)))?;
        serde_json::to_writer_pretty(file, &settings.sanitized())
            .map_err(|e| save_err(format!("{:?}: {}", path, e)))?;

        info!("Saved calibration data to {:?}", path);
        Ok(())
    }
}

/// Keeps settings for the life of the process only.
#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<HashMap<DeviceRole, DeviceSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(role: DeviceRole, settings: DeviceSettings) -> Self {
        let store = Self::new();
        store
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(role, settings);
        store
    }

    pub fn get(&self, role: DeviceRole) -> Option<DeviceSettings> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&role)
            .cloned()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self, role: DeviceRole) -> Result<Option<DeviceSettings>, PersistenceError> {
        Ok(self.get(role))
    }

    fn save(&self, role: DeviceRole, settings: &DeviceSettings) -> Result<(), PersistenceError> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(role, settings.sanitized());
        Ok(())
    }
}
