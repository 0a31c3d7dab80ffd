use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::ExecutionMode;

/// Live "is this source enabled" check.
pub trait FeatureFlag: Send + Sync {
    fn is_enabled(&self) -> bool;
}

impl FeatureFlag for AtomicBool {
    fn is_enabled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,
    pub collection: String,
    pub lookback_minutes: i64,
    pub source_tag: String,
    pub execution_mode: ExecutionMode,
    /// Overall deadline for one background work unit, none by default.
    pub work_deadline_secs: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            collection: "entries".into(),
            lookback_minutes: 5,
            source_tag: "cloud-entries".into(),
            execution_mode: ExecutionMode::Foreground,
            work_deadline_secs: None,
        }
    }
}

impl SourceSettings {
    pub fn work_deadline(&self) -> Option<Duration> {
        self.work_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    glucose_source: SourceSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn source(&self) -> SourceSettings {
        self.read().glucose_source.clone()
    }

    pub fn update_source(&self, settings: SourceSettings) -> Result<()> {
        let mut guard = self.write();
        guard.glucose_source = settings;
        self.persist(&guard)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut guard = self.write();
        guard.glucose_source.enabled = enabled;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: UserSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl FeatureFlag for SettingsStore {
    fn is_enabled(&self) -> bool {
        self.read().glucose_source.enabled
    }
}
