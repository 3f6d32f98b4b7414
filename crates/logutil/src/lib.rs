//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Output format for the global logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configure the global logger.
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this more than
/// once is a no-op.
pub fn configure_global_logger(default_level: Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NONE)
        .with_thread_ids(true);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Initialize logging for tests.
///
/// Logs are written through the test writer so they're only shown for failing
/// tests. Defaults to ERROR, override with `RUST_LOG`.
pub fn init_test() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::ERROR.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(env_filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_test_twice() {
        init_test();
        init_test();
        tracing::error!("logging initialized");
    }

    #[test]
    fn global_logger_after_test_logger() {
        init_test();
        configure_global_logger(Level::DEBUG, LogFormat::Json);
        tracing::debug!(format = ?LogFormat::default(), "still logging");
    }
}
