// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Loaded from a TOML file; every section is optional and falls back to the
//! defaults of a stock Lurker sink node on `/dev/ttyUSB0` at 57600 baud.

use crate::mapper::{FieldMapping, MappingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid field mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Where frames are read from.
    #[serde(default)]
    pub link: LinkConfig,

    /// Frame reader settings.
    #[serde(default)]
    pub frame: FrameConfig,

    /// Consumer loop settings.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Where mapped records are sent.
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,

    /// Sensor unit id -> destination credential.
    #[serde(default)]
    pub channels: BTreeMap<String, String>,

    /// Measurement name -> destination field name.
    #[serde(default = "FieldMapping::default_fields")]
    pub fields: BTreeMap<String, String>,
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::default()]
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            frame: FrameConfig::default(),
            upload: UploadConfig::default(),
            sinks: default_sinks(),
            channels: BTreeMap::new(),
            fields: FieldMapping::default_fields(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.link {
            LinkConfig::Serial {
                port,
                baud_rate,
                read_timeout_ms,
            } => {
                if port.trim().is_empty() {
                    return Err(ConfigError::Invalid("Serial port name is empty".into()));
                }
                if *baud_rate == 0 {
                    return Err(ConfigError::Invalid("Baud rate must be positive".into()));
                }
                check_read_timeout(*read_timeout_ms)?;
            }
            LinkConfig::Tcp {
                address,
                read_timeout_ms,
            } => {
                if address.trim().is_empty() {
                    return Err(ConfigError::Invalid("TCP address is empty".into()));
                }
                check_read_timeout(*read_timeout_ms)?;
            }
        }

        if self.frame.max_len == 0 {
            return Err(ConfigError::Invalid(
                "Maximum frame length must be positive".into(),
            ));
        }

        if self.upload.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Queue poll interval must be positive".into(),
            ));
        }

        if self.sinks.is_empty() {
            return Err(ConfigError::Invalid("No sinks configured".into()));
        }

        for (i, sink) in self.sinks.iter().enumerate() {
            match sink {
                SinkConfig::Thingspeak { base_url, .. } => {
                    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                        return Err(ConfigError::Invalid(format!(
                            "Sink {} has a base URL without http(s) scheme: {}",
                            i, base_url
                        )));
                    }
                }
                SinkConfig::JsonLines { path } => {
                    if path.as_os_str().is_empty() {
                        return Err(ConfigError::Invalid(format!("Sink {} has an empty path", i)));
                    }
                }
                SinkConfig::Stdout => {}
            }
        }

        if self.channels.is_empty() {
            return Err(ConfigError::Invalid(
                "No channels configured; every record would be dropped".into(),
            ));
        }

        FieldMapping::new(self.channels.clone(), self.fields.clone())?;

        Ok(())
    }

    /// Build the immutable mapping tables.
    pub fn field_mapping(&self) -> Result<FieldMapping, ConfigError> {
        Ok(FieldMapping::new(
            self.channels.clone(),
            self.fields.clone(),
        )?)
    }

    /// Add a channel credential.
    pub fn add_channel(&mut self, id: impl Into<String>, credential: impl Into<String>) {
        self.channels.insert(id.into(), credential.into());
    }
}

fn check_read_timeout(read_timeout_ms: u64) -> Result<(), ConfigError> {
    if read_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "Read timeout must be positive (a zero timeout would spin)".into(),
        ));
    }
    Ok(())
}

/// Byte link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    /// Local serial port.
    Serial {
        #[serde(default = "default_port")]
        port: String,

        #[serde(default = "default_baud_rate")]
        baud_rate: u32,

        #[serde(default = "default_read_timeout_ms")]
        read_timeout_ms: u64,
    },

    /// Serial-over-TCP adapter.
    Tcp {
        address: String,

        #[serde(default = "default_read_timeout_ms")]
        read_timeout_ms: u64,
    },
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::Serial {
            port: default_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl LinkConfig {
    /// Read timeout applied to every byte read.
    pub fn read_timeout(&self) -> Duration {
        match self {
            LinkConfig::Serial {
                read_timeout_ms, ..
            }
            | LinkConfig::Tcp {
                read_timeout_ms, ..
            } => Duration::from_millis(*read_timeout_ms),
        }
    }
}

/// Frame reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Frames longer than this are discarded.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_max_len() -> usize {
    crate::frame::DEFAULT_MAX_FRAME_LEN
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
        }
    }
}

/// Consumer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Minimum delay between two uploads (seconds).
    ///
    /// ThingSpeak free channels reject updates closer than 15 s apart.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How long the consumer waits on an empty queue before re-checking
    /// whether it should stop (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_interval_secs() -> u64 {
    15
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Record sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// ThingSpeak-compatible HTTP update endpoint.
    Thingspeak {
        #[serde(default = "default_base_url")]
        base_url: String,

        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },

    /// Append every mapped record to a JSON-lines file.
    JsonLines { path: PathBuf },

    /// Print mapped records (dry run).
    Stdout,
}

fn default_base_url() -> String {
    "https://api.thingspeak.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Thingspeak {
            base_url: default_base_url(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}
