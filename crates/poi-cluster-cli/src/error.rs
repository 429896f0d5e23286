use poi_cluster_lib::ClusterError;
use std::path::PathBuf;

/// Errors surfaced by the command line host
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Index builder stopped unexpectedly")]
    BuilderGone,
}

pub type Result<T> = std::result::Result<T, CliError>;
