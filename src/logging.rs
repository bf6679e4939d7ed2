use crate::config::LogLevel;

/// Installs the global fmt subscriber. Call once per process.
pub fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(level))
        .with_thread_names(true)
        .init();
}
