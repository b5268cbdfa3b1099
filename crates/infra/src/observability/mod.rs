//! Tracing subscriber setup
//!
//! Every busline crate logs through `tracing`; this module installs the
//! process-wide subscriber that renders those events.
//!
//! The filter comes from `BUSLINE_LOG` when set (any `EnvFilter` directive
//! string, e.g. `busline_core=debug,info`) and otherwise from
//! [`LoggingConfig::level`].

use busline_domain::{BusError, BusResult, LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable holding a filter directive override.
pub const LOG_ENV_VAR: &str = "BUSLINE_LOG";

/// Install the global subscriber.
///
/// Returns `Ok(false)` without changing anything when a global subscriber
/// is already installed.
///
/// # Errors
/// Returns `BusError::Config` when neither `BUSLINE_LOG` nor the configured
/// level is a valid filter.
pub fn init_tracing(config: &LoggingConfig) -> BusResult<bool> {
    let filter = build_filter(std::env::var(LOG_ENV_VAR).ok().as_deref(), &config.level)?;

    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![build_fmt_layer(config.format), Box::new(filter)];

    let installed = Registry::default().with(layers).try_init().is_ok();
    if installed {
        tracing::debug!(format = %config.format, "Tracing initialised");
    }
    Ok(installed)
}

/// Prefer a valid `env_directive`; otherwise parse `level`.
fn build_filter(env_directive: Option<&str>, level: &str) -> BusResult<EnvFilter> {
    if let Some(filter) = env_directive.and_then(|directive| EnvFilter::try_new(directive).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| BusError::Config(format!("Invalid log level '{level}': {e}")))
}

fn build_fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Text => Box::new(
            tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates filter selection.
    ///
    /// Assertions:
    /// - Confirms a valid env directive wins over the configured level.
    /// - Confirms an invalid env directive falls back to the level.
    /// - Ensures an invalid level without an override is a `Config` error.
    #[test]
    fn test_build_filter() {
        let filter = build_filter(Some("busline_core=trace"), "info").unwrap();
        assert!(filter.to_string().contains("busline_core=trace"));

        let filter = build_filter(Some("busline_core=loud"), "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");

        assert!(matches!(build_filter(None, "a=b=c"), Err(BusError::Config(_))));
    }

    /// Validates that initialisation happens at most once.
    ///
    /// Assertions:
    /// - Confirms a second call reports `false`.
    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = LoggingConfig { format: LogFormat::Json, ..LoggingConfig::default() };
        let _ = init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }
}
