//! SpatialIndex - per-zoom cluster hierarchy
//!
//! The index is built once per point batch and never mutated afterwards. Levels are
//! produced from `max_zoom` down to `min_zoom`: the finest level holds one singleton
//! per point, and every coarser level is obtained by greedy radius agglomeration of the
//! level below it.
//!
//! # Merge order
//!
//! Features of a level are kept sorted by `(feature_id, anchor)`. When clustering the
//! next coarser level they are scanned in that order; the first unmerged feature
//! becomes a seed and absorbs every other unmerged feature within `pixel_radius`
//! screen pixels of it at the coarser zoom. Features absorbed by an earlier seed are
//! never revisited. Because ids depend only on member sets, the result does not
//! depend on the order in which points were supplied.

use crate::feature::{ClusterFeature, FeatureId};
use crate::point::{IngestReport, Ingested, Point, PointId, ingest};
use crate::quadtree::PointQuadtree;
use crate::{ClusterConfig, utils};
use geo::Coord;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};
use std::cmp::Ordering;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters that shape the cluster hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexParams {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub pixel_radius: f64,
    pub tile_size: f64,
}

impl From<&ClusterConfig> for IndexParams {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            pixel_radius: config.pixel_radius,
            tile_size: config.tile_size,
        }
    }
}

impl Default for IndexParams {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

/// What a tap on a feature resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum TapTarget {
    /// A single point: open its detail view
    Point(PointId),
    /// A cluster: zoom in to `expansion_zoom` to see it split
    Cluster {
        members: Arc<[PointId]>,
        expansion_zoom: u8,
    },
}

/// A feature stored in a level, with its links into the neighboring levels
#[derive(Debug, Clone)]
pub(crate) struct LevelEntry {
    pub feature: ClusterFeature,
    /// Position in unit Web Mercator space
    pub unit: Coord<f64>,
    /// Feature at the next coarser level that contains this one
    pub parent: Option<FeatureId>,
    /// Features at the next finer level this one was built from
    pub children: SmallVec<[FeatureId; 4]>,
}

/// All features of one zoom level plus a neighbor index over them
#[derive(Debug, Clone)]
pub(crate) struct Level {
    pub zoom: u8,
    /// Sorted by scan order, see [`scan_order`]
    pub entries: Vec<LevelEntry>,
    pub by_id: FxHashMap<FeatureId, u32>,
    pub tree: PointQuadtree,
}

/// Immutable multi-resolution cluster index
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    params: IndexParams,
    /// One level per zoom, indexed by `zoom - min_zoom`
    levels: Vec<Level>,
    /// Zoom level at which each feature id was formed
    origins: FxHashMap<FeatureId, u8>,
    /// Drop counts from ingesting the batch this index was built from
    ingest_report: IngestReport,
}

/// Ordering in which features of a level are scanned while clustering
#[inline]
fn scan_order(a: &ClusterFeature, b: &ClusterFeature) -> Ordering {
    a.feature_id
        .cmp(&b.feature_id)
        .then_with(|| a.anchor.cmp(&b.anchor))
}

impl Level {
    fn new(zoom: u8, mut items: Vec<(ClusterFeature, Coord<f64>, SmallVec<[FeatureId; 4]>)>) -> Self {
        items.par_sort_unstable_by(|a, b| scan_order(&a.0, &b.0));

        let entries: Vec<LevelEntry> = items
            .into_iter()
            .map(|(feature, unit, children)| LevelEntry {
                feature,
                unit,
                parent: None,
                children,
            })
            .collect();

        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.feature.feature_id, i as u32))
            .collect();

        let tree =
            PointQuadtree::from_positions(entries.iter().enumerate().map(|(i, e)| (e.unit, i as u32)));

        Self {
            zoom,
            entries,
            by_id,
            tree,
        }
    }

    #[inline]
    pub fn get(&self, id: FeatureId) -> Option<&LevelEntry> {
        self.by_id.get(&id).map(|&i| &self.entries[i as usize])
    }

    /// Cluster this level into the next coarser one and link parents
    fn coarsen(&mut self, zoom: u8, params: &IndexParams) -> Level {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::coarsen");

        let radius = utils::px_to_unit(params.pixel_radius, zoom, params.tile_size);
        let n = self.entries.len();
        let mut merged = vec![false; n];
        let mut parent_of: Vec<usize> = vec![0; n];
        let mut neighbors: Vec<u32> = Vec::new();
        let mut next: Vec<(ClusterFeature, Coord<f64>, SmallVec<[FeatureId; 4]>)> =
            Vec::with_capacity(n);

        for i in 0..n {
            if merged[i] {
                continue;
            }
            merged[i] = true;
            let slot = next.len();
            parent_of[i] = slot;

            let seed = &self.entries[i];
            neighbors.clear();
            self.tree.query_radius(seed.unit, radius, &mut neighbors);
            neighbors.retain(|&j| !merged[j as usize]);

            if neighbors.is_empty() {
                // Unmerged features propagate unchanged
                next.push((
                    seed.feature.clone(),
                    seed.unit,
                    smallvec![seed.feature.feature_id],
                ));
                continue;
            }

            // Entry indices follow scan order
            neighbors.sort_unstable();

            let mut parts: Vec<&ClusterFeature> = Vec::with_capacity(neighbors.len() + 1);
            let mut units: Vec<Coord<f64>> = Vec::with_capacity(neighbors.len() + 1);
            let mut children: SmallVec<[FeatureId; 4]> = SmallVec::new();
            parts.push(&seed.feature);
            units.push(seed.unit);
            children.push(seed.feature.feature_id);

            for &j in &neighbors {
                let j = j as usize;
                merged[j] = true;
                parent_of[j] = slot;
                let neighbor = &self.entries[j];
                parts.push(&neighbor.feature);
                units.push(neighbor.unit);
                children.push(neighbor.feature.feature_id);
            }

            let (feature, unit) = ClusterFeature::merged(&parts, &units, zoom);
            next.push((feature, unit, children));
        }

        for (entry, &slot) in self.entries.iter_mut().zip(&parent_of) {
            entry.parent = Some(next[slot].0.feature_id);
        }

        tracing::debug!(
            "Zoom {}: {} features clustered into {}",
            zoom,
            n,
            next.len()
        );

        Level::new(zoom, next)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Build the index from a batch of points
    ///
    /// The batch is ingested first (see [`ingest`]): malformed points and duplicate ids
    /// are dropped and reported through [`SpatialIndex::ingest_report`]. The result is
    /// deterministic and independent of input order.
    pub fn build(raw: impl IntoIterator<Item = Point>, params: IndexParams) -> Self {
        let started = instant::Instant::now();
        let Ingested {
            points,
            report: ingest_report,
        } = ingest(raw);

        let min_zoom = params.min_zoom.min(params.max_zoom);
        let max_zoom = params.max_zoom;

        let singletons: Vec<(ClusterFeature, Coord<f64>, SmallVec<[FeatureId; 4]>)> = points
            .par_iter()
            .map(|point| {
                (
                    ClusterFeature::singleton(point, max_zoom),
                    utils::wgs84_to_unit(point.latitude, point.longitude),
                    SmallVec::new(),
                )
            })
            .collect();

        // Finest level first, then coarsen one zoom at a time
        let mut levels: Vec<Level> = Vec::with_capacity(usize::from(max_zoom - min_zoom) + 1);
        levels.push(Level::new(max_zoom, singletons));
        for zoom in (min_zoom..max_zoom).rev() {
            let Some(finer) = levels.last_mut() else {
                break;
            };
            let coarser = finer.coarsen(zoom, &params);
            levels.push(coarser);
        }
        levels.reverse();

        let mut origins = FxHashMap::default();
        for level in &levels {
            for entry in &level.entries {
                origins.insert(entry.feature.feature_id, entry.feature.formed_at);
            }
        }

        tracing::info!(
            "Built spatial index: {} points, zoom {}..={}, {} top-level features in {:.1} ms",
            points.len(),
            min_zoom,
            max_zoom,
            levels.first().map_or(0, |l| l.entries.len()),
            started.elapsed().as_secs_f64() * 1000.0
        );

        Self {
            params: IndexParams { min_zoom, ..params },
            levels,
            origins,
            ingest_report,
        }
    }

    /// Parameters the index was built with
    #[inline]
    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    #[inline]
    pub fn min_zoom(&self) -> u8 {
        self.params.min_zoom
    }

    #[inline]
    pub fn max_zoom(&self) -> u8 {
        self.params.max_zoom
    }

    /// Number of accepted points
    #[inline]
    pub fn point_count(&self) -> usize {
        self.levels.last().map_or(0, |l| l.entries.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// Drop counts from ingesting the source batch
    #[inline]
    pub fn ingest_report(&self) -> IngestReport {
        self.ingest_report
    }

    /// Clamp a zoom level into `[min_zoom, max_zoom]`
    #[inline]
    pub fn clamp_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.params.min_zoom, self.params.max_zoom)
    }

    /// Level for a zoom, clamped into range
    #[inline]
    pub(crate) fn level(&self, zoom: u8) -> &Level {
        let zoom = self.clamp_zoom(zoom);
        &self.levels[usize::from(zoom - self.params.min_zoom)]
    }

    /// All features at a zoom level (clamped), in scan order
    pub fn features_at(&self, zoom: u8) -> impl Iterator<Item = &ClusterFeature> + '_ {
        self.level(zoom).entries.iter().map(|e| &e.feature)
    }

    /// Number of features at a zoom level (clamped)
    pub fn feature_count(&self, zoom: u8) -> usize {
        self.level(zoom).entries.len()
    }

    /// Look up a feature by id
    pub fn feature(&self, id: FeatureId) -> Option<&ClusterFeature> {
        let formed_at = *self.origins.get(&id)?;
        self.level(formed_at).get(id).map(|e| &e.feature)
    }

    /// The feature at `zoom - 1` that the feature `id` (as seen at `zoom`) belongs to
    pub fn parent(&self, zoom: u8, id: FeatureId) -> Option<&ClusterFeature> {
        let zoom = self.clamp_zoom(zoom);
        if zoom == self.params.min_zoom {
            return None;
        }
        let parent_id = self.level(zoom).get(id)?.parent?;
        self.level(zoom - 1).get(parent_id).map(|e| &e.feature)
    }

    /// The features one zoom level finer that a cluster was formed from
    ///
    /// Empty for single points and unknown ids.
    pub fn children(&self, id: FeatureId) -> Vec<&ClusterFeature> {
        let Some(&formed_at) = self.origins.get(&id) else {
            return Vec::new();
        };
        if formed_at >= self.params.max_zoom {
            return Vec::new();
        }
        let Some(entry) = self.level(formed_at).get(id) else {
            return Vec::new();
        };
        let finer = self.level(formed_at + 1);
        entry
            .children
            .iter()
            .filter_map(|&child| finer.get(child).map(|e| &e.feature))
            .collect()
    }

    /// Smallest zoom level at which a cluster splits into its children
    ///
    /// `None` for single points and unknown ids.
    pub fn expansion_zoom(&self, id: FeatureId) -> Option<u8> {
        let feature = self.feature(id)?;
        if !feature.is_cluster() {
            return None;
        }
        Some((feature.formed_at + 1).min(self.params.max_zoom))
    }

    /// Ids of every point contained in a feature
    pub fn leaves(&self, id: FeatureId) -> Option<&[PointId]> {
        self.feature(id).map(|f| &*f.member_ids)
    }

    /// Resolve a tapped feature into a detail target or a zoom target
    pub fn resolve_tap(&self, id: FeatureId) -> Option<TapTarget> {
        let feature = self.feature(id)?;
        if feature.is_cluster() {
            Some(TapTarget::Cluster {
                members: feature.member_ids.clone(),
                expansion_zoom: self.expansion_zoom(id)?,
            })
        } else {
            Some(TapTarget::Point(feature.anchor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn params() -> IndexParams {
        IndexParams {
            min_zoom: 0,
            max_zoom: 16,
            pixel_radius: 60.0,
            tile_size: 256.0,
        }
    }

    /// Three points ~116 px apart at zoom 14 but within a few pixels at zoom 10
    fn triangle() -> Vec<Point> {
        vec![
            Point::new(1, 0.0, 0.0),
            Point::new(2, 0.0, 0.01),
            Point::new(3, 0.01, 0.0),
        ]
    }

    fn member_sets(index: &SpatialIndex, zoom: u8) -> BTreeSet<Vec<u64>> {
        index
            .features_at(zoom)
            .map(|f| f.member_ids.iter().map(|m| m.0).collect())
            .collect()
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(Vec::new(), params());
        assert!(index.is_empty());
        for zoom in 0..=16 {
            assert_eq!(index.feature_count(zoom), 0);
        }
    }

    #[test]
    fn test_single_point_is_singleton_everywhere() {
        let index = SpatialIndex::build(vec![Point::new(9, 45.0, 7.0)], params());
        let top = index.features_at(16).next().unwrap().clone();
        for zoom in 0..=16 {
            let features: Vec<_> = index.features_at(zoom).collect();
            assert_eq!(features.len(), 1);
            assert_eq!(features[0].point_count, 1);
            // Propagated unchanged, so the id is the same at every level
            assert_eq!(features[0].feature_id, top.feature_id);
        }
        assert_eq!(index.expansion_zoom(top.feature_id), None);
        assert_eq!(
            index.resolve_tap(top.feature_id),
            Some(TapTarget::Point(PointId(9)))
        );
    }

    #[test]
    fn test_cluster_threshold_scenario() {
        let index = SpatialIndex::build(triangle(), params());

        let at_10: Vec<_> = index.features_at(10).collect();
        assert_eq!(at_10.len(), 1);
        assert_eq!(at_10[0].point_count, 3);

        let at_14: Vec<_> = index.features_at(14).collect();
        assert_eq!(at_14.len(), 3);
        assert!(at_14.iter().all(|f| f.point_count == 1));
    }

    #[test]
    fn test_co_located_points_always_merge() {
        let points = (0..5).map(|i| Point::new(i, 10.0, 10.0)).collect::<Vec<_>>();
        let index = SpatialIndex::build(points, params());
        assert_eq!(index.feature_count(16), 5);
        for zoom in 0..16 {
            let features: Vec<_> = index.features_at(zoom).collect();
            assert_eq!(features.len(), 1, "zoom {zoom}");
            assert_eq!(features[0].point_count, 5);
            assert!((features[0].centroid_lat() - 10.0).abs() < 1e-9);
            assert!((features[0].centroid_lon() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_monotonic_coarsening() {
        let points: Vec<Point> = (0..400)
            .map(|i| {
                let t = i as f64;
                Point::new(i, 40.0 + (t * 0.37).sin() * 2.0, 3.0 + (t * 0.11).cos() * 3.0)
                    .with_weight(1.0 + (i % 3) as f64)
            })
            .collect();
        let index = SpatialIndex::build(points, params());

        for zoom in 1..=16u8 {
            let coarser = index.level(zoom - 1);
            assert!(coarser.entries.len() <= index.level(zoom).entries.len());

            let mut total = 0;
            for entry in &coarser.entries {
                // Every coarser feature is the union of its children
                let mut members: Vec<PointId> = Vec::new();
                let mut count = 0;
                let mut weight = 0.0;
                for child_id in &entry.children {
                    let child = index.level(zoom).get(*child_id).expect("child exists");
                    assert_eq!(child.parent, Some(entry.feature.feature_id));
                    members.extend_from_slice(&child.feature.member_ids);
                    count += child.feature.point_count;
                    weight += child.feature.aggregated_weight;
                }
                members.sort_unstable();
                assert_eq!(&members[..], &*entry.feature.member_ids);
                assert_eq!(count, entry.feature.point_count);
                assert!((weight - entry.feature.aggregated_weight).abs() < 1e-9);
                total += entry.feature.point_count;
            }
            assert_eq!(total, 400);

            // Every finer feature has exactly one parent
            for entry in &index.level(zoom).entries {
                let parent = index.parent(zoom, entry.feature.feature_id).unwrap();
                assert!(parent.member_ids.contains(&entry.feature.member_ids[0]));
            }
        }
    }

    #[test]
    fn test_order_independence() {
        let points: Vec<Point> = (0..200)
            .map(|i| {
                let t = i as f64;
                Point::new(i * 7 + 3, (t * 0.13).sin() * 20.0, (t * 0.29).cos() * 40.0)
            })
            .collect();
        let mut reversed = points.clone();
        reversed.reverse();
        let mut interleaved: Vec<Point> = points.iter().step_by(2).copied().collect();
        interleaved.extend(points.iter().skip(1).step_by(2).copied());

        let a = SpatialIndex::build(points, params());
        let b = SpatialIndex::build(reversed, params());
        let c = SpatialIndex::build(interleaved, params());

        for zoom in 0..=16 {
            let ids_a: Vec<FeatureId> = a.features_at(zoom).map(|f| f.feature_id).collect();
            let ids_b: Vec<FeatureId> = b.features_at(zoom).map(|f| f.feature_id).collect();
            let ids_c: Vec<FeatureId> = c.features_at(zoom).map(|f| f.feature_id).collect();
            assert_eq!(ids_a, ids_b);
            assert_eq!(ids_a, ids_c);
            assert_eq!(member_sets(&a, zoom), member_sets(&b, zoom));
        }
    }

    #[test]
    fn test_hierarchy_navigation() {
        let index = SpatialIndex::build(triangle(), params());
        let cluster = index.features_at(10).next().unwrap().clone();
        assert!(cluster.is_cluster());

        let expansion = index.expansion_zoom(cluster.feature_id).unwrap();
        assert!(expansion > cluster.formed_at);
        assert!(expansion <= 14);

        let children = index.children(cluster.feature_id);
        assert!(children.len() >= 2);
        let child_points: usize = children.iter().map(|c| c.point_count).sum();
        assert_eq!(child_points, 3);

        assert_eq!(
            index.leaves(cluster.feature_id),
            Some(&[PointId(1), PointId(2), PointId(3)][..])
        );

        match index.resolve_tap(cluster.feature_id) {
            Some(TapTarget::Cluster {
                members,
                expansion_zoom,
            }) => {
                assert_eq!(members.len(), 3);
                assert_eq!(expansion_zoom, expansion);
            }
            other => panic!("unexpected tap target {other:?}"),
        }

        assert_eq!(index.resolve_tap(FeatureId(0xdead_beef)), None);
        assert!(index.children(FeatureId(0xdead_beef)).is_empty());
    }

    #[test]
    fn test_anchor_follows_seed_lineage() {
        let index = SpatialIndex::build(triangle(), params());
        let cluster = index.features_at(0).next().unwrap();
        // The anchor is always one of the members and names a finer-level feature
        assert!(cluster.member_ids.contains(&cluster.anchor));
        let singleton = index
            .features_at(16)
            .find(|f| f.anchor == cluster.anchor)
            .unwrap();
        assert_eq!(singleton.member_ids[0], cluster.anchor);
    }

    #[test]
    fn test_malformed_points_are_reported() {
        let points = vec![
            Point::new(1, 0.0, 0.0),
            Point::new(2, f64::NAN, 0.0),
            Point::new(3, 100.0, 0.0),
        ];
        let index = SpatialIndex::build(points, params());
        assert_eq!(index.point_count(), 1);
        assert_eq!(index.ingest_report().dropped(), 2);
    }

    #[test]
    fn test_zoom_clamping() {
        let p = IndexParams {
            min_zoom: 3,
            max_zoom: 8,
            ..params()
        };
        let index = SpatialIndex::build(triangle(), p);
        assert_eq!(index.clamp_zoom(0), 3);
        assert_eq!(index.clamp_zoom(20), 8);
        assert_eq!(index.feature_count(20), index.feature_count(8));
        assert!(index.parent(3, index.features_at(3).next().unwrap().feature_id).is_none());
    }
}
