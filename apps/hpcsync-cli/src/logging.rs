//! Structured logging setup using tracing.
//!
//! Logs go to stderr so run reports on stdout stay machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingSection};

/// Filter directive in effect: `--verbose` raises the configured level to
/// debug. `RUST_LOG` still wins over both.
pub fn filter_directive(config: &LoggingSection, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.level.clone()
    }
}

/// Initialize the tracing subscriber.
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging(config: &LoggingSection, verbose: bool) {
    let filter = filter_directive(config, verbose);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&filter))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{filter}': {e}, using 'info'");
            EnvFilter::new("info")
        });

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            )
            .with(filter_layer)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter_layer)
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(filter = %filter, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_level() {
        let config = LoggingSection {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        };
        assert_eq!(filter_directive(&config, false), "warn");
        assert_eq!(filter_directive(&config, true), "debug");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let config = LoggingSection::default();
        init_logging(&config, false);
        init_logging(&config, true);
    }
}
