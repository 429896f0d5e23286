//! Startup configuration for the clustering core

use crate::{ClusterError, Result, utils};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the marker layer
///
/// All values are fixed at startup. In particular the pool capacity never changes at
/// runtime; changing it means building a new [`MarkerLayer`](crate::MarkerLayer).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterConfig {
    /// Number of reusable rendering slots (N)
    pub pool_capacity: usize,
    /// Clustering radius in screen pixels
    pub pixel_radius: f64,
    /// Coarsest zoom level that gets its own cluster level
    pub min_zoom: u8,
    /// Finest zoom level; every point is a singleton here
    pub max_zoom: u8,
    /// Tile size in pixels used to project into screen space
    pub tile_size: f64,
    /// Rendered marker size in pixels; viewports are expanded by half of it
    pub marker_size_px: f64,
    /// Frames an appear/disappear/morph animation takes
    pub transition_frames: u16,
    /// Minimum time between two viewport queries, in milliseconds
    pub frame_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 64,
            pixel_radius: 60.0,
            min_zoom: 0,
            max_zoom: 16,
            tile_size: 256.0,
            marker_size_px: 40.0,
            transition_frames: 6,
            frame_interval_ms: 16,
        }
    }
}

impl ClusterConfig {
    /// Check the configuration for values the core cannot work with
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(ClusterError::InvalidConfig { reason });

        if self.min_zoom > self.max_zoom {
            return invalid(format!(
                "min_zoom ({}) must not exceed max_zoom ({})",
                self.min_zoom, self.max_zoom
            ));
        }
        if self.max_zoom > utils::MAX_ZOOM_LEVEL {
            return invalid(format!(
                "max_zoom ({}) must not exceed {}",
                self.max_zoom,
                utils::MAX_ZOOM_LEVEL
            ));
        }
        if !self.pixel_radius.is_finite() || self.pixel_radius <= 0.0 {
            return invalid(format!(
                "pixel_radius must be positive, got {}",
                self.pixel_radius
            ));
        }
        if !self.tile_size.is_finite() || self.tile_size <= 0.0 {
            return invalid(format!("tile_size must be positive, got {}", self.tile_size));
        }
        if !self.marker_size_px.is_finite() || self.marker_size_px < 0.0 {
            return invalid(format!(
                "marker_size_px must be non-negative, got {}",
                self.marker_size_px
            ));
        }
        Ok(())
    }

    /// Margin in pixels added around every viewport before querying
    #[inline]
    pub fn viewport_margin_px(&self) -> f64 {
        self.marker_size_px / 2.0
    }

    #[inline]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
