//! Shell configuration loaded from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `UPSILON_DETECT_BACKOFF_MS` | `100` |
//! | `UPSILON_MAX_DETECT_ATTEMPTS` | `0` (unlimited) |
//! | `UPSILON_MAX_LINE_BYTES` | 64 MiB |
//! | `UPSILON_VIRTUAL_MODEL` | `0110` |
//! | `UPSILON_VIRTUAL_DETECT_AFTER` | `0` |
//! | `UPSILON_VIRTUAL_UNPLUGGED` | `false` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::driver::VirtualDeviceConfig;
use crate::shell::DetectPolicy;

/// Default pause between two detection attempts.
const DEFAULT_DETECT_BACKOFF_MS: u64 = 100;

/// Default maximum request line size (64 MiB). Storage snapshots are
/// shipped inline, so this is generous.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Runtime settings of the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Pause between failed detections; zero busy-polls with a yield.
    pub detect_backoff: Duration,
    /// Give up connecting after this many attempts; `None` retries forever.
    pub max_detect_attempts: Option<u32>,
    /// Longest accepted request line.
    pub max_line_bytes: usize,
    /// Simulated calculator used by the binary.
    pub virtual_device: VirtualDeviceConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            detect_backoff: Duration::from_millis(DEFAULT_DETECT_BACKOFF_MS),
            max_detect_attempts: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            virtual_device: VirtualDeviceConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults
    /// for every unset key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for the first value that does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "UPSILON_DETECT_BACKOFF_MS")? {
            config.detect_backoff = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "UPSILON_MAX_DETECT_ATTEMPTS")? {
            config.max_detect_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some(bytes) = parse_var::<usize, _>(&lookup, "UPSILON_MAX_LINE_BYTES")? {
            if bytes == 0 {
                return Err(ConfigError {
                    key: "UPSILON_MAX_LINE_BYTES",
                    value: bytes.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.max_line_bytes = bytes;
        }
        if let Some(model) = lookup("UPSILON_VIRTUAL_MODEL") {
            let model = model.trim();
            if model.is_empty() {
                return Err(ConfigError {
                    key: "UPSILON_VIRTUAL_MODEL",
                    value: model.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            config.virtual_device.model = model.to_string();
        }
        if let Some(after) = parse_var::<u32, _>(&lookup, "UPSILON_VIRTUAL_DETECT_AFTER")? {
            config.virtual_device.detect_after = after;
        }
        if let Some(unplugged) = parse_flag(&lookup, "UPSILON_VIRTUAL_UNPLUGGED")? {
            config.virtual_device.plugged = !unplugged;
        }

        Ok(config)
    }

    /// Detection retry policy for the connection state machine.
    pub fn detect_policy(&self) -> DetectPolicy {
        DetectPolicy {
            backoff: self.detect_backoff,
            max_attempts: self.max_detect_attempts,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        _ => Err(ConfigError {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}
