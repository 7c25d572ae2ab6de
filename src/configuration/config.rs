use super::types::*;
use crate::data_capture::encoder::RECORD_OVERHEAD;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Command-line arguments of the `snare` binary.
///
/// Runtime parameters live in the TOML file; the command line only says
/// where the file is and how chatty the logs should be.
///
/// # Command Line
/// - `snare [CONFIG_FILE]`, or set `SNARE_CONFIG`
/// - `--verbose` switches the log level from `info` to `debug`
#[derive(Parser, Debug, Clone)]
#[command(name = "snare")]
#[command(version)]
#[command(about = "An SSH honeypot that captures every offered credential")]
pub struct CliArgs {
    /// Path to the TOML configuration file. Defaults are used when absent.
    #[arg(env = "SNARE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file made of three tables, every
/// field being optional:
/// - `[server]`: listener address, SSH identification banner, host key
///   location, session slot limit and the engine rejection delay
/// - `[policy]`: the per-connection budget (`max_attempts`,
///   `poll_interval_ms`, `max_pending_ticks`, `max_teardown_ticks`)
/// - `[capture]`: capture channel sizing
///
/// # Examples
///
/// ```
/// use snare::configuration::Config;
///
/// let config = Config::from_toml_str("[policy]\nmax_attempts = 5\n").unwrap();
/// assert_eq!(config.policy.max_attempts, 5);
/// assert_eq!(config.policy.poll_interval_ms, 100);
/// ```
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub policy: SessionPolicy,
    pub capture: CaptureConfig,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    ///
    /// # Errors
    /// - [`ConfigError::IoError`] if the file cannot be read
    /// - [`ConfigError::TomlError`] if it is not valid TOML for this structure
    /// - [`ConfigError::NotInRange`] if a value fails validation
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by the command line, or falls back to defaults.
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        match &args.config_file {
            Some(path) => Self::from_file(path),
            None => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        at_least("policy.max_attempts", policy.max_attempts as u64, 1)?;
        at_least("policy.poll_interval_ms", policy.poll_interval_ms, 1)?;
        at_least("policy.max_pending_ticks", policy.max_pending_ticks as u64, 1)?;
        at_least("policy.max_teardown_ticks", policy.max_teardown_ticks as u64, 1)?;

        at_least("server.max_sessions", self.server.max_sessions as u64, 1)?;
        if !self.server.server_id.starts_with("SSH-2.0-") {
            return Err(ConfigError::NotInRange(format!(
                "server.server_id must start with \"SSH-2.0-\", got {:?}",
                self.server.server_id
            )));
        }

        let capture = &self.capture;
        at_least("capture.queue_capacity", capture.queue_capacity as u64, 1)?;
        at_least("capture.buffer_bytes", capture.buffer_bytes as u64, 1)?;
        at_least(
            "capture.max_record_len",
            capture.max_record_len as u64,
            RECORD_OVERHEAD as u64,
        )?;
        if capture.max_record_len > u32::MAX as usize {
            return Err(ConfigError::NotInRange(format!(
                "capture.max_record_len must fit a 4-byte length prefix, got {}",
                capture.max_record_len
            )));
        }

        Ok(())
    }
}

fn at_least(name: &str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::NotInRange(format!(
            "{} must be at least {}, got {}",
            name, min, value
        )));
    }
    Ok(())
}
