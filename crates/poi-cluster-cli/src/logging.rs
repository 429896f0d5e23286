//! Logging setup for the command line host

use tracing_subscriber::prelude::*;

/// Initialize logging with sensible defaults
///
/// If `RUST_LOG` is not set, a default filter is installed first.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug,poi_cluster_lib=info");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    let registry = tracing_subscriber::registry().with(fmt_layer);
    if registry.try_init().is_err() {
        tracing::debug!("Logging already initialized");
        return;
    }

    tracing::info!("Logging initialized");
}

/// Log version info
pub fn log_version_info() {
    tracing::info!("{}", short_version_info());
}

pub fn short_version_info() -> String {
    format!(
        "{} {} (poi-cluster-lib, {} profiling)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        if cfg!(feature = "profiling") {
            "with"
        } else {
            "without"
        }
    )
}
