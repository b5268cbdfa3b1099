//! Client configuration structures
//!
//! Every struct deserialises with defaults for missing fields, so a config
//! file only needs to name what it overrides. Durations are milliseconds.

use std::time::Duration;

use busline_common::utils::serde::{duration_millis, option_duration_millis};
use busline_common::RetryOptions;
use serde::{Deserialize, Serialize};

use crate::errors::{BusError, BusResult};
use crate::impl_wire_str_conversions;
use crate::types::{ReceiveMode, SubQueue};

/// Default post-first-message wait in peek-lock mode.
pub const DEFAULT_MAX_WAIT_AFTER_FIRST: Duration = Duration::from_millis(20);
/// Default post-first-message wait in receive-and-delete mode.
pub const DEFAULT_MAX_WAIT_AFTER_FIRST_RECEIVE_AND_DELETE: Duration = Duration::from_secs(1);
/// Default bound on the drain phase.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Default receiver buffer size.
pub const DEFAULT_PREFETCH_CREDIT: u32 = 2048;

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub namespace: NamespaceConfig,
    pub retry: RetryOptions,
    pub receiver: ReceiverConfig,
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns [`BusError::Config`] for an empty host or inverted retry
    /// delays.
    pub fn validate(&self) -> BusResult<()> {
        if self.namespace.host.trim().is_empty() {
            return Err(BusError::Config("namespace host must not be empty".to_string()));
        }
        self.retry.validate().map_err(|e| BusError::Config(e.to_string()))?;
        if self.receiver.prefetch_credit == 0 {
            return Err(BusError::Config("prefetch_credit must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Connection owner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Fully qualified broker host name.
    pub host: String,

    /// How long before token expiry the claim is renegotiated.
    #[serde(with = "duration_millis")]
    pub claim_refresh_threshold: Duration,

    /// Delay before retrying a failed claim renewal.
    #[serde(with = "duration_millis")]
    pub claim_retry_interval: Duration,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            claim_refresh_threshold: Duration::from_secs(5 * 60),
            claim_retry_interval: Duration::from_secs(60),
        }
    }
}

/// Receiver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub receive_mode: ReceiveMode,
    pub sub_queue: Option<SubQueue>,

    /// Wait after the first message of a batch; `None` picks the per-mode
    /// default.
    #[serde(with = "option_duration_millis")]
    pub max_wait_after_first: Option<Duration>,

    #[serde(with = "duration_millis")]
    pub drain_timeout: Duration,

    /// Link buffer size; must be at least the largest batch requested.
    pub prefetch_credit: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            receive_mode: ReceiveMode::PeekLock,
            sub_queue: None,
            max_wait_after_first: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            prefetch_credit: DEFAULT_PREFETCH_CREDIT,
        }
    }
}

impl ReceiverConfig {
    /// Effective post-first-message wait for the configured receive mode.
    #[must_use]
    pub fn effective_max_wait_after_first(&self) -> Duration {
        self.max_wait_after_first.unwrap_or(match self.receive_mode {
            ReceiveMode::PeekLock => DEFAULT_MAX_WAIT_AFTER_FIRST,
            ReceiveMode::ReceiveAndDelete => DEFAULT_MAX_WAIT_AFTER_FIRST_RECEIVE_AND_DELETE,
        })
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl_wire_str_conversions!(LogFormat {
    Text => "text",
    Json => "json",
});

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `BUSLINE_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates defaults for every section.
    ///
    /// Assertions:
    /// - Confirms retry defaults of 3 retries, 4s and 120s.
    /// - Confirms claim refresh 5 minutes before expiry.
    /// - Confirms the peek-lock post-first wait is 20ms.
    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(4));
        assert_eq!(config.retry.max_retry_delay, Duration::from_secs(120));
        assert_eq!(config.namespace.claim_refresh_threshold, Duration::from_secs(300));
        assert_eq!(config.receiver.effective_max_wait_after_first(), Duration::from_millis(20));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    /// Validates the receive-and-delete post-first wait default and an
    /// explicit override.
    ///
    /// Assertions:
    /// - Confirms receive-and-delete defaults to 1s.
    /// - Confirms an explicit value wins over the per-mode default.
    #[test]
    fn test_max_wait_after_first_per_mode() {
        let mut receiver =
            ReceiverConfig { receive_mode: ReceiveMode::ReceiveAndDelete, ..Default::default() };
        assert_eq!(receiver.effective_max_wait_after_first(), Duration::from_secs(1));

        receiver.max_wait_after_first = Some(Duration::from_millis(5));
        assert_eq!(receiver.effective_max_wait_after_first(), Duration::from_millis(5));
    }

    /// Validates `validate` rejections.
    ///
    /// Assertions:
    /// - Ensures an empty host is rejected.
    /// - Ensures `max_retry_delay < retry_delay` is rejected.
    /// - Ensures a populated default config passes.
    #[test]
    fn test_validate() {
        let mut config = ClientConfig::default();
        assert!(matches!(config.validate(), Err(BusError::Config(_))));

        config.namespace.host = "example.servicebus.windows.net".to_string();
        assert!(config.validate().is_ok());

        config.retry.max_retry_delay = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(BusError::Config(_))));
    }

    /// Validates parsing a partial TOML document.
    ///
    /// Assertions:
    /// - Confirms overridden fields are read in milliseconds.
    /// - Confirms untouched fields keep their defaults.
    #[test]
    fn test_partial_toml() {
        let doc = r#"
            [namespace]
            host = "sb.local"

            [retry]
            max_retries = 5
            retry_delay = 100

            [receiver]
            receive_mode = "receive_and_delete"
            sub_queue = "dead_letter"

            [logging]
            format = "json"
        "#;

        let config: ClientConfig = toml::from_str(doc).unwrap();
        assert_eq!(config.namespace.host, "sb.local");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_retry_delay, Duration::from_secs(120));
        assert_eq!(config.receiver.receive_mode, ReceiveMode::ReceiveAndDelete);
        assert_eq!(config.receiver.sub_queue, Some(SubQueue::DeadLetter));
        assert_eq!(config.receiver.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
