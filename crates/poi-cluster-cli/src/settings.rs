use crate::error::{CliError, Result};
use clap::Parser;
use poi_cluster_lib::ClusterConfig;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// POI Cluster - drive the clustering and marker pool core headlessly
pub struct Settings {
    /// JSON file with an array of points ({"id", "latitude", "longitude", "weight"?})
    #[clap(short, long, value_name = "FILE")]
    pub points: Option<PathBuf>,

    /// Generate this many synthetic points around the start position
    #[clap(short, long, default_value = "0")]
    pub synthetic: usize,

    /// JSON file with a cluster configuration; flags below override it
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of rendering slots
    #[clap(long)]
    pub pool_capacity: Option<usize>,

    /// Clustering radius in screen pixels
    #[clap(long)]
    pub pixel_radius: Option<f64>,

    /// Coarsest zoom level
    #[clap(long)]
    pub min_zoom: Option<u8>,

    /// Finest zoom level
    #[clap(long)]
    pub max_zoom: Option<u8>,

    /// Number of frames to simulate
    #[clap(long, default_value = "120")]
    pub frames: usize,

    /// Latitude of the viewport center at the first frame
    #[clap(long, default_value = "48.8566", allow_negative_numbers = true)]
    pub center_lat: f64,

    /// Longitude of the viewport center at the first frame
    #[clap(long, default_value = "2.3522", allow_negative_numbers = true)]
    pub center_lon: f64,

    /// Zoom level at the first frame
    #[clap(long, default_value = "8")]
    pub zoom_from: u8,

    /// Zoom level at the last frame
    #[clap(long, default_value = "16")]
    pub zoom_to: u8,

    /// Viewport size in screen pixels, as WIDTHxHEIGHT
    #[clap(long, default_value = "1280x720", value_parser = parse_screen)]
    pub screen: (u32, u32),

    /// Write the final slot snapshot and diagnostics as JSON to this file instead of stdout
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

fn parse_screen(value: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

impl Settings {
    /// Parse from the command line, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Resolve the cluster configuration: defaults, then the config file, then flags
    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => read_json::<ClusterConfig>(path)?,
            None => ClusterConfig::default(),
        };
        if let Some(pool_capacity) = self.pool_capacity {
            config.pool_capacity = pool_capacity;
        }
        if let Some(pixel_radius) = self.pixel_radius {
            config.pixel_radius = pixel_radius;
        }
        if let Some(min_zoom) = self.min_zoom {
            config.min_zoom = min_zoom;
        }
        if let Some(max_zoom) = self.max_zoom {
            config.max_zoom = max_zoom;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Read and deserialize a JSON file
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["poi-cluster"]).unwrap();
        assert_eq!(settings.frames, 120);
        assert_eq!(settings.screen, (1280, 720));
        assert!(settings.points.is_none());
        assert_eq!(settings.cluster_config().unwrap(), ClusterConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = Settings::try_parse_from([
            "poi-cluster",
            "--pool-capacity",
            "8",
            "--pixel-radius",
            "80",
            "--max-zoom",
            "18",
            "--center-lon",
            "-3.7",
            "--screen",
            "800x600",
        ])
        .unwrap();
        let config = settings.cluster_config().unwrap();
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.pixel_radius, 80.0);
        assert_eq!(config.max_zoom, 18);
        assert_eq!(settings.center_lon, -3.7);
        assert_eq!(settings.screen, (800, 600));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let settings =
            Settings::try_parse_from(["poi-cluster", "--min-zoom", "10", "--max-zoom", "2"])
                .unwrap();
        assert!(matches!(
            settings.cluster_config(),
            Err(CliError::Cluster(_))
        ));
    }

    #[test]
    fn test_bad_screen_is_rejected() {
        assert!(Settings::try_parse_from(["poi-cluster", "--screen", "wide"]).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let settings = Settings::try_parse_from([
            "poi-cluster",
            "--config",
            "/nonexistent/poi-cluster-config.json",
        ])
        .unwrap();
        assert!(matches!(
            settings.cluster_config(),
            Err(CliError::Io { .. })
        ));
    }
}
