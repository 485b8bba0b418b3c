//! Engine settings.
//!
//! Settings are plain data, deserialized from TOML with a default for every
//! field, so an empty document is a valid configuration:
//!
//! ```toml
//! reading_interval = 5
//! preferred_transmitter = "bubble"
//! crc_policy = "strict"
//! nfc_read_mode = "multiple"
//! silence_timeout_secs = 600
//!
//! [oop]
//! enabled = true
//! site = "http://www.glucose.space/"
//! token = "bubble-201907"
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::sans::{fram::CrcPolicy, nfc::ReadMode, vendor::TransmitterKind};

/// An error loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid TOML or holds values of the wrong type.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The reading interval must be between 1 and 255 minutes.
    #[error("Reading interval must be at least one minute, found {0}.")]
    ReadingInterval(u8),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Minutes between transmitter readings.
    pub reading_interval: u8,
    /// Only connect to transmitters of this kind; `none` accepts any.
    pub preferred_transmitter: TransmitterKind,
    pub crc_policy: CrcPolicy,
    pub nfc_read_mode: ReadMode,
    /// Treat a streaming link as lost after this long without a notification.
    pub silence_timeout_secs: Option<u64>,
    pub oop: OopConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reading_interval: 5,
            preferred_transmitter: TransmitterKind::None,
            crc_policy: CrcPolicy::Advisory,
            nfc_read_mode: ReadMode::Single,
            silence_timeout_secs: None,
            oop: OopConfig::default(),
        }
    }
}

impl Config {
    /// Parse and validate settings from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;

        if config.reading_interval == 0 {
            Err(ConfigError::ReadingInterval(config.reading_interval))?
        }

        Ok(config)
    }

    pub fn silence_timeout(&self) -> Option<Duration> {
        self.silence_timeout_secs.map(Duration::from_secs)
    }
}

/// Remote calibration service settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OopConfig {
    pub enabled: bool,
    /// Base URL, with a trailing slash.
    pub site: String,
    pub token: String,
}

impl Default for OopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            site: "http://www.glucose.space/".to_string(),
            token: "bubble-201907".to_string(),
        }
    }
}
