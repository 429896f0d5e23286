//! Viewport queries against one level of the cluster hierarchy

use crate::feature::ClusterFeature;
use crate::index::SpatialIndex;
use crate::utils;
use geo::{Coord, Rect};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A lat/lon rectangle in degrees
///
/// `west > east` describes a box that crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether the box has zero (or undefined) area
    pub fn is_degenerate(&self) -> bool {
        let finite = self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite();
        !finite || self.south >= self.north || self.west == self.east
    }

    /// Whether the box wraps across the 180° meridian
    #[inline]
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Center of the box as (latitude, longitude)
    pub fn center(&self) -> (f64, f64) {
        let lat = (self.south + self.north) / 2.0;
        if !self.crosses_antimeridian() {
            return (lat, (self.west + self.east) / 2.0);
        }
        let mut lon = (self.west + self.east + 360.0) / 2.0;
        if lon > 180.0 {
            lon -= 360.0;
        }
        (lat, lon)
    }

    /// Center of the box in unit Web Mercator space
    #[inline]
    pub fn center_unit(&self) -> Coord<f64> {
        let (lat, lon) = self.center();
        utils::wgs84_to_unit(lat, lon)
    }

    /// Unit-space rectangles covering the box expanded by `margin` on every side
    ///
    /// Spans that leave `[0, 1]` horizontally wrap around to the other edge, so a box
    /// crossing the antimeridian yields two rectangles.
    fn unit_rects(&self, margin: f64) -> SmallVec<[Rect<f64>; 2]> {
        let top = (utils::lat_to_unit_y(self.north) - margin).max(0.0);
        let bottom = (utils::lat_to_unit_y(self.south) + margin).min(1.0);

        let lo = utils::lon_to_unit_x(self.west) - margin;
        let mut hi = utils::lon_to_unit_x(self.east) + margin;
        if self.crosses_antimeridian() {
            hi += 1.0;
        }

        let mut rects = SmallVec::new();
        if hi - lo >= 1.0 {
            rects.push(Rect::new(Coord { x: 0.0, y: top }, Coord { x: 1.0, y: bottom }));
            return rects;
        }
        for shift in [-1.0, 0.0, 1.0] {
            let (a, b) = ((lo + shift).max(0.0), (hi + shift).min(1.0));
            if a <= b {
                rects.push(Rect::new(Coord { x: a, y: top }, Coord { x: b, y: bottom }));
            }
        }
        rects
    }
}

/// What the map currently shows
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub bounds: BoundingBox,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(bounds: BoundingBox, zoom: u8) -> Self {
        Self { bounds, zoom }
    }
}

/// Return every feature visible in `viewport`, sorted by feature id
///
/// The bounding box is expanded by `margin_px` screen pixels so markers near the edge
/// do not pop in abruptly. The zoom level is clamped into the index range. Degenerate
/// boxes yield nothing.
pub fn query(index: &SpatialIndex, viewport: &Viewport, margin_px: f64) -> Vec<ClusterFeature> {
    #[cfg(feature = "profiling")]
    profiling::scope!("query::query");

    if viewport.bounds.is_degenerate() || index.is_empty() {
        return Vec::new();
    }

    let zoom = index.clamp_zoom(viewport.zoom);
    let level = index.level(zoom);
    let params = index.params();
    let margin = utils::px_to_unit(margin_px.max(0.0), zoom, params.tile_size);

    let mut hits: Vec<u32> = Vec::new();
    for rect in viewport.bounds.unit_rects(margin) {
        level.tree.query_rect(rect, &mut hits);
    }
    // Wrapped rectangles may overlap when the box spans nearly the whole world
    hits.sort_unstable();
    hits.dedup();

    // Entries are kept in feature id order, so index order is id order
    let features: Vec<ClusterFeature> = hits
        .into_iter()
        .map(|i| level.entries[i as usize].feature.clone())
        .collect();

    tracing::trace!(
        "Query at zoom {} returned {} of {} features",
        zoom,
        features.len(),
        level.entries.len()
    );
    features
}
