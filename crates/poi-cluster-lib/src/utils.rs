//! Utility functions for coordinate conversions and pixel-space projection
//!
//! Clustering works in "unit" Web Mercator space: both axes span `[0, 1]`, `x` grows
//! eastward from the antimeridian and `y` grows southward from the northern Mercator
//! limit. Multiplying a unit coordinate by [`world_size_px`] gives the screen pixel
//! position at a zoom level, so pixel distances between two features at zoom `z` are
//! unit distances scaled by `tile_size * 2^z`.

use geo::Coord;
use std::f64::consts::PI;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Highest zoom level the projection helpers accept
pub const MAX_ZOOM_LEVEL: u8 = 30;

/// Convert a longitude in degrees to unit x in `[0, 1]`
#[inline(always)]
pub fn lon_to_unit_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

/// Convert a latitude in degrees to unit y in `[0, 1]` (north is 0)
///
/// Latitudes beyond the Web Mercator limit are clamped.
#[inline(always)]
pub fn lat_to_unit_y(lat: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = 0.5 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / (2.0 * PI);
    y.clamp(0.0, 1.0)
}

/// Inverse of [`lon_to_unit_x`]
#[inline(always)]
pub fn unit_x_to_lon(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Inverse of [`lat_to_unit_y`]
#[inline(always)]
pub fn unit_y_to_lat(y: f64) -> f64 {
    (PI / 2.0 - 2.0 * ((y - 0.5) * 2.0 * PI).exp().atan()).to_degrees()
}

/// Convert WGS84 (lat, lon) to unit Web Mercator space
///
/// # Arguments
/// * `lat` - Latitude in degrees (clamped to the Mercator range)
/// * `lon` - Longitude in degrees (-180 to 180)
///
/// # Returns
/// A `Coord<f64>` with x (eastward) and y (southward), both in `[0, 1]`
#[inline(always)]
pub fn wgs84_to_unit(lat: f64, lon: f64) -> Coord<f64> {
    Coord {
        x: lon_to_unit_x(lon),
        y: lat_to_unit_y(lat),
    }
}

/// Convert a unit Web Mercator coordinate back to WGS84
///
/// # Returns
/// A tuple of (latitude, longitude) in degrees
#[inline(always)]
pub fn unit_to_wgs84(coord: Coord<f64>) -> (f64, f64) {
    (unit_y_to_lat(coord.y), unit_x_to_lon(coord.x))
}

/// Side length of the whole world in pixels at the given zoom
#[inline(always)]
pub fn world_size_px(zoom: u8, tile_size: f64) -> f64 {
    tile_size * f64::from(1u32 << zoom.min(MAX_ZOOM_LEVEL))
}

/// Convert a pixel distance at `zoom` into a unit-space distance
#[inline(always)]
pub fn px_to_unit(px: f64, zoom: u8, tile_size: f64) -> f64 {
    px / world_size_px(zoom, tile_size)
}

/// Check whether a latitude/longitude pair is a usable WGS84 position
#[inline(always)]
pub fn is_valid_wgs84(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Squared distance between two unit coordinates, taking the short way around in x
///
/// Unit x wraps at the antimeridian, so 0.99 and 0.01 are 0.02 apart.
#[inline(always)]
pub fn wrapped_distance_sq(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = (a.x - b.x).abs().rem_euclid(1.0);
    let dx = dx.min(1.0 - dx);
    let dy = a.y - b.y;
    dx * dx + dy * dy
}
