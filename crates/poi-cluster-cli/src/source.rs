//! Point batches for the host: from a JSON file or generated

use crate::error::Result;
use crate::settings::read_json;
use poi_cluster_lib::Point;
use std::path::Path;

/// Load a point batch from a JSON array
pub fn load_points(path: &Path) -> Result<Vec<Point>> {
    let points: Vec<Point> = read_json(path)?;
    tracing::info!("Loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

/// Generate a deterministic batch of `count` points around a center
///
/// Points are spread over a few neighbourhoods at increasing distance so that every
/// zoom level shows a mix of clusters and single markers.
pub fn synthetic_points(count: usize, center_lat: f64, center_lon: f64) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let t = i as f64;
            let hood = (i % 7) as f64;
            let ring = 0.02 * (1.0 + hood * hood);
            let spread = 0.004 * (1.0 + (t * 0.618).fract() * 4.0);
            let lat = center_lat + (hood * 0.9).sin() * ring + (t * 1.7).sin() * spread;
            let lon = center_lon + (hood * 0.9).cos() * ring * 1.5 + (t * 2.3).cos() * spread;
            Point::new(i as u64, lat.clamp(-85.0, 85.0), wrap_lon(lon))
                .with_weight(1.0 + (i % 4) as f64)
        })
        .collect()
}

fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_points_are_valid_and_deterministic() {
        let a = synthetic_points(500, 48.8566, 2.3522);
        let b = synthetic_points(500, 48.8566, 2.3522);
        assert_eq!(a, b);
        assert!(a.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_synthetic_points_wrap_longitude() {
        let points = synthetic_points(50, 0.0, 179.99);
        assert!(points.iter().all(|p| (-180.0..=180.0).contains(&p.longitude)));
    }

    #[test]
    fn test_load_points_missing_file() {
        assert!(load_points(Path::new("/nonexistent/points.json")).is_err());
    }
}
