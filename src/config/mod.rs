//! Configuration module for scopy-acq
//!
//! This module handles:
//! - Preferences read by the acquisition pipeline (target FPS, default Y
//!   mode, acquisition timeout, default buffer and plot sizes)
//! - Change notification for preferences keyed by string name
//! - Persisted per-instrument session state (see [`session`])
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/scopy-acq/`
//! - **macOS**: `~/Library/Application Support/scopy-acq/`
//! - **Windows**: `%APPDATA%\scopy-acq\`
//!
//! # Files
//!
//! - `preferences.json` - Pipeline preferences
//! - `sessions/<instrument>.toml` - Saved instrument sessions
//! - `logs/` - Daily rolling log files
//!
//! # Example
//!
//! ```ignore
//! use scopy_acq::config::{keys, PreferenceStore, Preferences};
//!
//! let mut store = PreferenceStore::new(Preferences::load_or_default());
//! let changes = store.subscribe();
//! store.set(keys::PLOT_TARGET_FPS, serde_json::json!(30.0))?;
//! ```

pub mod session;

pub use session::{ChannelSession, InstrumentSession};

use crate::error::{AcqError, Result};
use crate::types::YMode;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "scopy-acq";

/// Preferences filename
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Default redraw rate
pub const DEFAULT_TARGET_FPS: f64 = 60.0;

/// Default device timeout in milliseconds
pub const DEFAULT_ACQ_TIMEOUT_MS: u64 = 5000;

/// Default buffer and plot size for new instruments
pub const DEFAULT_INSTRUMENT_BUFFER_SIZE: usize = 1024;

/// Preference key names.
pub mod keys {
    pub const PLOT_TARGET_FPS: &str = "general_plot_target_fps";
    pub const DEFAULT_Y_MODE: &str = "adc_default_y_mode";
    pub const ACQ_TIMEOUT_MS: &str = "general_acq_timeout_ms";
    pub const DEFAULT_BUFFER_SIZE: &str = "adc_default_buffer_size";
    pub const DEFAULT_PLOT_SIZE: &str = "adc_default_plot_size";

    pub const ALL: &[&str] = &[
        PLOT_TARGET_FPS,
        DEFAULT_Y_MODE,
        ACQ_TIMEOUT_MS,
        DEFAULT_BUFFER_SIZE,
        DEFAULT_PLOT_SIZE,
    ];
}

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| AcqError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            AcqError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Preferences ====================

/// Preferences consumed by the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Plot redraw rate in frames per second
    pub general_plot_target_fps: f64,
    /// Y axis mode given to new time channels
    pub adc_default_y_mode: YMode,
    /// Device refill timeout in milliseconds
    pub general_acq_timeout_ms: u64,
    /// Buffer size given to new instruments
    pub adc_default_buffer_size: usize,
    /// Plot size given to new time instruments
    pub adc_default_plot_size: usize,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            general_plot_target_fps: DEFAULT_TARGET_FPS,
            adc_default_y_mode: YMode::default(),
            general_acq_timeout_ms: DEFAULT_ACQ_TIMEOUT_MS,
            adc_default_buffer_size: DEFAULT_INSTRUMENT_BUFFER_SIZE,
            adc_default_plot_size: DEFAULT_INSTRUMENT_BUFFER_SIZE,
        }
    }
}

impl Preferences {
    /// Load preferences from a JSON file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AcqError::Config(format!("Failed to read preferences: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AcqError::Config(format!("Failed to parse preferences: {}", e)))
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = app_data_dir().map(|d| d.join(PREFERENCES_FILE)) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load preferences, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save preferences to a JSON file
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| AcqError::Config(format!("Failed to write preferences: {}", e)))
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(PREFERENCES_FILE))
    }

    /// Redraw interval for the configured target FPS.
    pub fn frame_interval(&self) -> Duration {
        frame_interval(self.general_plot_target_fps)
    }

    pub fn acq_timeout(&self) -> Duration {
        Duration::from_millis(self.general_acq_timeout_ms)
    }

    /// Set one field by key name.
    ///
    /// Returns false when the value is unchanged. Unknown keys and values of
    /// the wrong type are rejected and leave `self` untouched.
    pub fn apply_change(&mut self, key: &str, value: &serde_json::Value) -> Result<bool> {
        let mut map = serde_json::to_value(&*self)?;
        let slot = map
            .get_mut(key)
            .ok_or_else(|| AcqError::Config(format!("Unknown preference key: {}", key)))?;
        if *slot == *value {
            return Ok(false);
        }
        *slot = value.clone();
        *self = serde_json::from_value(map)
            .map_err(|e| AcqError::Config(format!("Invalid value for {}: {}", key, e)))?;
        Ok(true)
    }
}

/// `round(1000 / fps)` milliseconds, with the rate floored at 1 FPS.
pub fn frame_interval(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps >= 1.0 { fps } else { 1.0 };
    Duration::from_millis((1000.0 / fps).round() as u64)
}

// ==================== Preference Store ====================

/// A preference changed through [`PreferenceStore::set`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceChanged {
    pub key: String,
    pub value: serde_json::Value,
}

/// Owns the current preferences and fans out change notifications.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    prefs: Preferences,
    subscribers: Vec<Sender<PreferenceChanged>>,
}

impl PreferenceStore {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs,
            subscribers: Vec::new(),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn subscribe(&mut self) -> Receiver<PreferenceChanged> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Result<serde_json::Value> {
        let map = serde_json::to_value(&self.prefs)?;
        map.get(key)
            .cloned()
            .ok_or_else(|| AcqError::Config(format!("Unknown preference key: {}", key)))
    }

    /// Change one preference and notify subscribers.
    ///
    /// Unknown keys and values of the wrong type are rejected and leave the
    /// store unchanged.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        if !self.prefs.apply_change(key, &value)? {
            return Ok(());
        }
        tracing::info!("Preference {} = {}", key, value);
        let change = PreferenceChanged {
            key: key.to_string(),
            value,
        };
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preferences_default() {
        let prefs = Preferences::default();
        assert_eq!(prefs.general_plot_target_fps, 60.0);
        assert_eq!(prefs.general_acq_timeout_ms, 5000);
        assert_eq!(prefs.adc_default_y_mode, YMode::Count);
    }

    #[test]
    fn test_frame_interval_rounding() {
        assert_eq!(frame_interval(30.0), Duration::from_millis(33));
        assert_eq!(frame_interval(10.0), Duration::from_millis(100));
        assert_eq!(frame_interval(60.0), Duration::from_millis(17));
        assert_eq!(frame_interval(0.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let prefs: Preferences = serde_json::from_str(r#"{"general_plot_target_fps": 25.0}"#).unwrap();
        assert_eq!(prefs.general_plot_target_fps, 25.0);
        assert_eq!(prefs.adc_default_buffer_size, 1024);
    }

    #[test]
    fn test_store_notifies_subscribers() {
        let mut store = PreferenceStore::default();
        let rx = store.subscribe();

        store.set(keys::PLOT_TARGET_FPS, json!(30.0)).unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "general_plot_target_fps");
        assert_eq!(store.preferences().general_plot_target_fps, 30.0);

        // Same value again is not a change
        store.set(keys::PLOT_TARGET_FPS, json!(30.0)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_store_rejects_unknown_key() {
        let mut store = PreferenceStore::default();
        let err = store.set("general_theme", json!("dark")).unwrap_err();
        assert!(matches!(err, AcqError::Config(_)));
    }

    #[test]
    fn test_store_rejects_wrong_type() {
        let mut store = PreferenceStore::default();
        assert!(store.set(keys::ACQ_TIMEOUT_MS, json!("soon")).is_err());
        assert_eq!(store.preferences().general_acq_timeout_ms, 5000);
    }

    #[test]
    fn test_y_mode_by_name() {
        let mut store = PreferenceStore::default();
        store.set(keys::DEFAULT_Y_MODE, json!("full_scale")).unwrap();
        assert_eq!(store.preferences().adc_default_y_mode, YMode::FullScale);
        assert_eq!(store.get(keys::DEFAULT_Y_MODE).unwrap(), json!("full_scale"));
    }

    #[test]
    fn test_all_keys_are_known() {
        let store = PreferenceStore::default();
        for key in keys::ALL {
            assert!(store.get(key).is_ok(), "{}", key);
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        let prefs = Preferences {
            general_plot_target_fps: 12.0,
            ..Preferences::default()
        };
        prefs.save_to(&path).unwrap();
        assert_eq!(Preferences::load_from(&path).unwrap(), prefs);
    }
}
