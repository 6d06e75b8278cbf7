//! Tracing subscriber setup from the logging config section.

use idsync_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over the config
/// level; the target client can be given its own level.
pub fn init(logging: &LoggingConfig, target_log_level: &str) -> anyhow::Result<()> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if !target_log_level.is_empty() {
        filter = filter.add_directive(
            format!("idsync_ytsaurus={}", target_log_level.to_lowercase()).parse()?,
        );
    }

    if logging.is_production {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
