//! Cluster features: the unit of output of the spatial index

use crate::point::{Point, PointId};
use crate::utils;
use geo::Coord;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Deterministic identity of a cluster feature
///
/// Derived from the sorted member ids and the zoom level at which the feature was
/// formed. A feature that survives unmerged into coarser levels keeps its id, so the
/// same input set always yields the same ids and identical features compare equal
/// across frames and zoom levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FeatureId(pub u64);

impl FeatureId {
    /// Compute the id for a sorted member list formed at `zoom`
    pub fn derive(sorted_members: &[PointId], zoom: u8) -> Self {
        let mut hasher = FxHasher::default();
        zoom.hash(&mut hasher);
        sorted_members.len().hash(&mut hasher);
        for member in sorted_members {
            member.0.hash(&mut hasher);
        }
        Self(hasher.finish())
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A cluster representative, or a single point when `point_count == 1`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterFeature {
    pub feature_id: FeatureId,
    /// Weight-averaged position (x = longitude, y = latitude)
    pub centroid: geo::Point<f64>,
    pub point_count: usize,
    pub aggregated_weight: f64,
    /// Sorted ids of every point this feature stands for
    pub member_ids: Arc<[PointId]>,
    /// Member whose lineage this feature continues
    ///
    /// When features merge, the seed of the merge passes its anchor on, so a cluster
    /// and the finer feature it grew from share an anchor. The pool uses this to morph
    /// a slot between cluster and single display instead of remounting it.
    pub anchor: PointId,
    /// Zoom level at which this feature was formed
    pub formed_at: u8,
}

impl ClusterFeature {
    /// Wrap a single point as a one-member feature formed at `zoom`
    pub fn singleton(point: &Point, zoom: u8) -> Self {
        let members: Arc<[PointId]> = Arc::from([point.id]);
        Self {
            feature_id: FeatureId::derive(&members, zoom),
            centroid: geo::Point::new(point.longitude, point.latitude),
            point_count: 1,
            aggregated_weight: point.weight,
            member_ids: members,
            anchor: point.id,
            formed_at: zoom,
        }
    }

    /// Merge a seed feature with its neighbors into a new feature formed at `zoom`
    ///
    /// `units` holds the unit-space position of each input feature, in the same order as
    /// `parts` (seed first). The centroid is the weight-weighted average in unit space,
    /// falling back to point counts when all weights are zero. Returns the feature and
    /// its unit-space centroid.
    pub(crate) fn merged(
        parts: &[&ClusterFeature],
        units: &[Coord<f64>],
        zoom: u8,
    ) -> (Self, Coord<f64>) {
        debug_assert_eq!(parts.len(), units.len());
        let seed = parts[0];

        let point_count: usize = parts.iter().map(|f| f.point_count).sum();
        let aggregated_weight: f64 = parts.iter().map(|f| f.aggregated_weight).sum();

        let (mut sum_x, mut sum_y, mut total) = (0.0, 0.0, 0.0);
        for (feature, unit) in parts.iter().zip(units) {
            let w = if aggregated_weight > 0.0 {
                feature.aggregated_weight
            } else {
                feature.point_count as f64
            };
            sum_x += unit.x * w;
            sum_y += unit.y * w;
            total += w;
        }
        let unit = Coord {
            x: sum_x / total,
            y: sum_y / total,
        };
        let (lat, lon) = utils::unit_to_wgs84(unit);

        let mut members: Vec<PointId> = Vec::with_capacity(point_count);
        for feature in parts {
            members.extend_from_slice(&feature.member_ids);
        }
        members.sort_unstable();
        let members: Arc<[PointId]> = members.into();

        let feature = Self {
            feature_id: FeatureId::derive(&members, zoom),
            centroid: geo::Point::new(lon, lat),
            point_count,
            aggregated_weight,
            member_ids: members,
            anchor: seed.anchor,
            formed_at: zoom,
        };
        (feature, unit)
    }

    /// Whether this feature aggregates more than one point
    #[inline]
    pub fn is_cluster(&self) -> bool {
        self.point_count > 1
    }

    #[inline]
    pub fn centroid_lat(&self) -> f64 {
        self.centroid.y()
    }

    #[inline]
    pub fn centroid_lon(&self) -> f64 {
        self.centroid.x()
    }

    /// Position in unit Web Mercator space
    #[inline]
    pub fn unit_position(&self) -> Coord<f64> {
        utils::wgs84_to_unit(self.centroid_lat(), self.centroid_lon())
    }
}
