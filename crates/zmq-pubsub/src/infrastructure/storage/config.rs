//! TOML configuration for the `zmq-pubsub` binary.
//!
//! The file is optional.  Every field has a default, so an absent file, an
//! empty file, and a file that sets only `transport.address` are all valid:
//!
//! ```toml
//! log_level = "debug"
//!
//! [transport]
//! address = "tcp://127.0.0.1:5555"
//! postfix = "@"
//!
//! [transport.curve]            # optional; enables CURVE on the subscribers
//! server_key = "Yne@$w-vo<fVvi]a<NY6T1ed:M$fCG*[IaLV{hID"
//! path = "/var/lib/zmq-pubsub/client-keys"
//!
//! [publisher]
//! enabled = true
//!
//! [publisher.curve]            # optional; the binding publisher is the CURVE server
//! server = true
//! path = "/var/lib/zmq-pubsub/server-keys"
//!
//! [[publisher.schedule]]
//! channel = "test"
//! message = "app service publisher message at channel: test"
//! interval_ms = 1000
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, which is what lets a partial file
//! parse.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zmq_pubsub_core::{
    ChannelOptions, ConnectionOptions, CurveOptions, DEFAULT_CHANNEL_POSTFIX,
};

use crate::application::demo_publisher::{default_schedules, Schedule};
use crate::infrastructure::server::ServerOptions;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "zmq-pubsub.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The TOML parsed but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// Endpoint and channel settings shared by the publisher and the channel
/// server.  `curve` applies to the channel server's subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_postfix")]
    pub postfix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<CurveOptions>,
}

/// The demo publisher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<CurveOptions>,
    #[serde(default = "default_schedule")]
    pub schedule: Vec<ScheduleEntry>,
}

/// One periodic message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub channel: String,
    pub message: Value,
    pub interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_address() -> String {
    "tcp://127.0.0.1:5555".to_string()
}
fn default_postfix() -> String {
    DEFAULT_CHANNEL_POSTFIX.to_string()
}
fn default_true() -> bool {
    true
}
fn default_schedule() -> Vec<ScheduleEntry> {
    default_schedules().into_iter().map(ScheduleEntry::from).collect()
}

impl From<Schedule> for ScheduleEntry {
    fn from(schedule: Schedule) -> Self {
        Self {
            channel: schedule.channel,
            message: schedule.message,
            interval_ms: u64::try_from(schedule.interval.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            postfix: default_postfix(),
            curve: None,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            curve: None,
            schedule: default_schedule(),
        }
    }
}

// ── Conversions into runtime options ──────────────────────────────────────────

impl AppConfig {
    /// Options for the channel server's subscriber connections.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            address: self.transport.address.clone(),
            curve: self.transport.curve.clone(),
            channel: Some(self.channel_options()),
        }
    }

    /// Options for the demo publisher connection.
    pub fn publisher_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::publisher(self.transport.address.clone());
        options.curve = self.publisher.curve.clone();
        options.channel = Some(self.channel_options());
        options
    }

    /// The demo publisher's schedule.
    pub fn schedules(&self) -> Vec<Schedule> {
        self.publisher
            .schedule
            .iter()
            .map(|entry| Schedule {
                channel: entry.channel.clone(),
                message: entry.message.clone(),
                interval: Duration::from_millis(entry.interval_ms),
            })
            .collect()
    }

    /// Checks values that parse but cannot run.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a schedule entry with an empty channel or
    /// a zero `interval_ms`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.publisher.schedule {
            if entry.channel.is_empty() {
                return Err(ConfigError::Invalid(
                    "publisher.schedule entry has an empty channel".into(),
                ));
            }
            if entry.interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "publisher.schedule entry for {:?} has interval_ms = 0",
                    entry.channel
                )));
            }
        }
        Ok(())
    }

    fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            postfix: Some(self.transport.postfix.clone()),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if [`AppConfig::validate`] rejects it.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
