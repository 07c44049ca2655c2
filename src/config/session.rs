//! Saved instrument sessions
//!
//! An [`InstrumentSession`] is the settings snapshot of one instrument:
//! capture parameters, channel enable states and FFT options. Sessions are
//! written as TOML under `app_data_dir()/sessions/<name>.toml` and stamped
//! with the time they were saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::analysis::WindowFunction;
use crate::config::{app_data_dir, ensure_app_data_dir};
use crate::error::{AcqError, Result};
use crate::types::{InstrumentKind, YMode, DEFAULT_BUFFER_SIZE};

/// Sessions subdirectory under the app data dir
pub const SESSIONS_DIR: &str = "sessions";

/// Current session format version
pub const SESSION_VERSION: u32 = 1;

/// Per-channel saved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSession {
    pub enabled: bool,
    /// Only meaningful for time channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_mode: Option<YMode>,
}

impl ChannelSession {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            y_mode: None,
        }
    }
}

/// Settings snapshot of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSession {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    pub kind: InstrumentKind,
    pub saved_at: DateTime<Utc>,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_buffer_size")]
    pub plot_size: usize,
    /// Replaces the device-reported sample rate when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_override: Option<f64>,
    #[serde(default)]
    pub rolling: bool,
    #[serde(default)]
    pub single_shot: bool,
    #[serde(default)]
    pub sync_mode: bool,
    #[serde(default)]
    pub complex_mode: bool,

    #[serde(default)]
    pub fft_window: WindowFunction,
    #[serde(default = "default_averaging")]
    pub fft_averaging: usize,
    #[serde(default)]
    pub power_offset: f64,

    /// Keyed by channel name
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSession>,
}

fn default_version() -> u32 {
    SESSION_VERSION
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_averaging() -> usize {
    1
}

impl InstrumentSession {
    pub fn new(name: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            version: SESSION_VERSION,
            name: name.into(),
            kind,
            saved_at: Utc::now(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            plot_size: DEFAULT_BUFFER_SIZE,
            sample_rate_override: None,
            rolling: false,
            single_shot: false,
            sync_mode: false,
            complex_mode: false,
            fft_window: WindowFunction::default(),
            fft_averaging: default_averaging(),
            power_offset: 0.0,
            channels: BTreeMap::new(),
        }
    }

    /// Whether `channel` was enabled, `None` if the session never saw it.
    pub fn channel_enabled(&self, channel: &str) -> Option<bool> {
        self.channels.get(channel).map(|c| c.enabled)
    }

    /// File name derived from the instrument name.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}.toml", stem)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AcqError::Config(format!("Failed to read session {}: {}", path.display(), e))
        })?;
        let session: Self = toml::from_str(&content)?;
        if session.version > SESSION_VERSION {
            tracing::warn!(
                "Session {} has newer version {} (supported: {})",
                path.display(),
                session.version,
                SESSION_VERSION
            );
        }
        Ok(session)
    }

    /// Stamp the session and write it to `path`.
    pub fn save_to(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.saved_at = Utc::now();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        tracing::debug!("Saved session {} to {}", self.name, path.as_ref().display());
        Ok(())
    }

    /// Save under the default sessions directory, returning the file path.
    pub fn save(&mut self) -> Result<PathBuf> {
        let dir = ensure_app_data_dir()?.join(SESSIONS_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(self.file_name());
        self.save_to(&path)?;
        Ok(path)
    }

    /// Load the session saved under `name`, if any.
    pub fn load(name: &str) -> Option<Self> {
        let template = Self::new(name, InstrumentKind::Time);
        let path = app_data_dir()?.join(SESSIONS_DIR).join(template.file_name());
        if !path.exists() {
            return None;
        }
        Self::load_from(&path)
            .map_err(|e| tracing::warn!("Ignoring session {}: {}", name, e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc-fft.toml");

        let mut session = InstrumentSession::new("adc-fft", InstrumentKind::Frequency);
        session.buffer_size = 4096;
        session.complex_mode = true;
        session.fft_window = WindowFunction::Blackman;
        session.fft_averaging = 4;
        session
            .channels
            .insert("voltage0".into(), ChannelSession::enabled(true));
        session.channels.insert(
            "voltage1".into(),
            ChannelSession {
                enabled: false,
                y_mode: Some(YMode::Scale),
            },
        );
        session.save_to(&path).unwrap();

        let loaded = InstrumentSession::load_from(&path).unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.channel_enabled("voltage1"), Some(false));
        assert_eq!(loaded.channel_enabled("voltage7"), None);
    }

    #[test]
    fn test_sparse_file_uses_defaults() {
        let text = r#"
name = "adc-time"
kind = "time"
saved_at = "2024-05-01T12:00:00Z"
"#;
        let session: InstrumentSession = toml::from_str(text).unwrap();
        assert_eq!(session.version, SESSION_VERSION);
        assert_eq!(session.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(session.fft_averaging, 1);
        assert!(session.sample_rate_override.is_none());
        assert!(session.channels.is_empty());
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let session = InstrumentSession::new("adc / time", InstrumentKind::Time);
        assert_eq!(session.file_name(), "adc___time.toml");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "name = [").unwrap();
        assert!(InstrumentSession::load_from(&path).is_err());
    }
}
