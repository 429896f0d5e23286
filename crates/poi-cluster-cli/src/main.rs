use std::process::ExitCode;

fn main() -> ExitCode {
    match poi_cluster_cli::run_native() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
