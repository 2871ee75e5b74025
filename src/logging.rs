//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over `monitoring.log_level`. With
//! `structured_logging` enabled events are written as JSON lines.

use tracing_subscriber::EnvFilter;

use crate::config::MonitoringConfig;

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed; the existing one
/// stays in place.
pub fn init(config: &MonitoringConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.structured_logging {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(
            level = %config.log_level,
            json = config.structured_logging,
            "Logging initialized"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = MonitoringConfig::default();
        init(&config);
        assert!(!init(&config));
    }
}
