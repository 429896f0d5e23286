//! Headless host for the POI clustering core
//!
//! Loads (or generates) a point batch, builds the cluster index off the frame loop,
//! drives a scripted viewport sweep through the marker layer and reports the final slot
//! list a renderer would consume.

pub mod error;
pub mod host;
pub mod logging;
pub mod run;
pub mod runtime;
pub mod settings;
pub mod source;

pub use error::{CliError, Result};
pub use host::{BuildFn, Host, HostHealth};
pub use logging::{log_version_info, setup_logging, short_version_info};
pub use run::{Report, execute};
pub use settings::Settings;

/// Native entry point: parse arguments, run a session on a tokio runtime
pub fn run_native() -> Result<()> {
    setup_logging();
    log_version_info();

    let settings = Settings::from_cli();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    rt.block_on(execute(settings))
}
