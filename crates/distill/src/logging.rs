//! Tracing subscriber setup.
//!
//! Logs go to stderr. `RUST_LOG` overrides `[logging] level` when set.

use anyhow::{anyhow, Result};
use tracing::debug;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Returns `false` when one was already
/// installed, in which case the existing subscriber stays in place.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("Invalid logging.level '{}': {}", config.level, e))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(atty::is(atty::Stream::Stderr)),
            )
            .try_init()
    };

    match installed {
        Ok(()) => Ok(true),
        // Tests and embedding callers may have installed one first.
        Err(e) => {
            debug!(error = %e, "Tracing subscriber already installed; keeping it");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_keeps_existing_subscriber() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }
}
