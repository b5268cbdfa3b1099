//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `BUSLINE_HOST` is unset, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `BUSLINE_HOST`: Broker host name (required)
//! - `BUSLINE_RETRY_MAX_RETRIES`: Retries after the first attempt
//! - `BUSLINE_RETRY_DELAY_MS`: Base retry delay in milliseconds
//! - `BUSLINE_RETRY_MAX_DELAY_MS`: Retry delay cap in milliseconds
//! - `BUSLINE_RECEIVE_MODE`: `peek_lock` or `receive_and_delete`
//! - `BUSLINE_RECEIVE_MAX_WAIT_AFTER_FIRST_MS`: Batch wait after the first
//!   message
//! - `BUSLINE_RECEIVE_DRAIN_TIMEOUT_MS`: Bound on the credit drain
//! - `BUSLINE_LOG_LEVEL`: Default log filter
//! - `BUSLINE_LOG_FORMAT`: `text` or `json`
//!
//! Unset optional variables keep their defaults.
//!
//! ## File Locations
//! The loader probes the following paths (in order), in the current
//! working directory and then next to the executable:
//! 1. `busline.toml`, `busline.json`
//! 2. `config.toml`, `config.json`

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use busline_domain::{BusError, BusResult, ClientConfig, LogFormat, ReceiveMode};

const CANDIDATE_FILES: [&str; 4] = ["busline.toml", "busline.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `BusError::Config` if neither source yields a valid
/// configuration.
pub fn load() -> BusResult<ClientConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `BUSLINE_*` environment variables
///
/// # Errors
/// Returns `BusError::Config` if `BUSLINE_HOST` is missing or a variable
/// has an invalid value.
pub fn load_from_env() -> BusResult<ClientConfig> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a configuration from a variable lookup.
fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BusResult<ClientConfig> {
    let mut config = ClientConfig::default();

    config.namespace.host = lookup("BUSLINE_HOST")
        .filter(|host| !host.trim().is_empty())
        .ok_or_else(|| BusError::Config("Missing required environment variable: BUSLINE_HOST".into()))?;

    if let Some(retries) = parse_var(&lookup, "BUSLINE_RETRY_MAX_RETRIES")? {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = parse_var(&lookup, "BUSLINE_RETRY_DELAY_MS")? {
        config.retry.retry_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_var(&lookup, "BUSLINE_RETRY_MAX_DELAY_MS")? {
        config.retry.max_retry_delay = Duration::from_millis(ms);
    }
    if let Some(mode) = parse_var::<ReceiveMode>(&lookup, "BUSLINE_RECEIVE_MODE")? {
        config.receiver.receive_mode = mode;
    }
    if let Some(ms) = parse_var(&lookup, "BUSLINE_RECEIVE_MAX_WAIT_AFTER_FIRST_MS")? {
        config.receiver.max_wait_after_first = Some(Duration::from_millis(ms));
    }
    if let Some(ms) = parse_var(&lookup, "BUSLINE_RECEIVE_DRAIN_TIMEOUT_MS")? {
        config.receiver.drain_timeout = Duration::from_millis(ms);
    }
    if let Some(level) = lookup("BUSLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = parse_var::<LogFormat>(&lookup, "BUSLINE_LOG_FORMAT")? {
        config.logging.format = format;
    }

    config.validate()?;
    Ok(config)
}

/// Parse an optional variable, rejecting values that do not parse.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> BusResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| BusError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. The format is
/// detected by file extension.
///
/// # Errors
/// Returns `BusError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or validation fails
pub fn load_from_file(path: Option<PathBuf>) -> BusResult<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(BusError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            BusError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| BusError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> BusResult<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| BusError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| BusError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(BusError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }
    probe_in(&dirs)
}

fn probe_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CANDIDATE_FILES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}
