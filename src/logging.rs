use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Safe to call more than once; only
/// the first call wins (tests construct several apps in one process).
pub(crate) fn init_logging(data_dir: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    tracing::debug!(data_dir = %data_dir, "logging initialized");
}
