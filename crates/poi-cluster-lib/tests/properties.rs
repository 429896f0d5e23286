//! Property tests for the clustering and pooling invariants

use poi_cluster_lib::{
    BoundingBox, ClusterFeature, FeatureId, IndexParams, ModeTransitionController, Point,
    PointId, PoolAssigner, SpatialIndex, Viewport, query,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn params() -> IndexParams {
    IndexParams {
        min_zoom: 0,
        max_zoom: 12,
        pixel_radius: 60.0,
        tile_size: 256.0,
    }
}

fn points_strategy(max: usize) -> impl Strategy<Value = Vec<Point>> {
    prop::collection::vec((-2.0f64..2.0, -2.0f64..2.0, 0.0f64..5.0), 0..max).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (lat, lon, weight))| Point::new(i as u64, lat, lon).with_weight(weight))
            .collect()
    })
}

fn viewport_strategy() -> impl Strategy<Value = Viewport> {
    (-2.0f64..2.0, -2.0f64..2.0, 0.05f64..3.0, 0u8..14).prop_map(|(lat, lon, half, zoom)| {
        Viewport::new(
            BoundingBox::new(lon - half, lat - half, lon + half, lat + half),
            zoom,
        )
    })
}

fn member_sets(index: &SpatialIndex, zoom: u8) -> BTreeSet<(FeatureId, Vec<PointId>)> {
    index
        .features_at(zoom)
        .map(|f| (f.feature_id, f.member_ids.to_vec()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn clustering_is_order_independent(
        (points, shuffled) in points_strategy(80)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = SpatialIndex::build(points, params());
        let b = SpatialIndex::build(shuffled, params());
        for zoom in 0..=12 {
            prop_assert_eq!(member_sets(&a, zoom), member_sets(&b, zoom));
        }
    }

    #[test]
    fn coarsening_is_monotonic(points in points_strategy(80)) {
        let index = SpatialIndex::build(points, params());
        let total = index.point_count();
        for zoom in 1..=12u8 {
            let finer: Vec<&ClusterFeature> = index.features_at(zoom).collect();
            let coarser: Vec<&ClusterFeature> = index.features_at(zoom - 1).collect();
            prop_assert!(coarser.len() <= finer.len());
            prop_assert_eq!(coarser.iter().map(|f| f.point_count).sum::<usize>(), total);

            // Each finer feature lies wholly inside exactly one coarser feature
            for feature in &finer {
                let containing = coarser
                    .iter()
                    .filter(|c| feature.member_ids.iter().all(|m| c.member_ids.contains(m)))
                    .count();
                prop_assert_eq!(containing, 1);
                let parent = index.parent(zoom, feature.feature_id);
                prop_assert!(parent.is_some());
            }
        }
    }

    #[test]
    fn pool_never_exceeds_capacity(
        points in points_strategy(60),
        capacity in 0usize..12,
        frames in prop::collection::vec(viewport_strategy(), 1..12),
    ) {
        let index = SpatialIndex::build(points, params());
        let mut pool = PoolAssigner::new(capacity);
        let mut transitions = ModeTransitionController::new(capacity, 3);

        for viewport in &frames {
            let visible = query(&index, viewport, 20.0);
            pool.reconcile(&visible, &viewport.bounds);
            transitions.update(pool.slots());
            transitions.tick();

            prop_assert_eq!(pool.slots().len(), capacity);
            prop_assert!(pool.visible_count() <= capacity);

            let mut shown = Vec::new();
            for (i, slot) in pool.slots().iter().enumerate() {
                prop_assert_eq!(slot.slot_index(), i);
                if slot.is_visible() {
                    let id = slot.assigned().unwrap();
                    prop_assert!(visible.iter().any(|f| f.feature_id == id));
                    shown.push(id);
                }
            }
            let count = shown.len();
            shown.sort_unstable();
            shown.dedup();
            prop_assert_eq!(shown.len(), count);
            prop_assert_eq!(count, visible.len().min(capacity));
        }
    }

    #[test]
    fn slight_pan_keeps_identity(
        points in points_strategy(40),
        viewport in viewport_strategy(),
        dx in -0.01f64..0.01,
    ) {
        let index = SpatialIndex::build(points, params());
        let mut pool = PoolAssigner::new(64);

        let before = query(&index, &viewport, 0.0);
        pool.reconcile(&before, &viewport.bounds);
        let slots_before: Vec<(FeatureId, usize)> = pool
            .slots()
            .iter()
            .filter(|s| s.is_visible())
            .filter_map(|s| s.assigned().map(|id| (id, s.slot_index())))
            .collect();

        let b = viewport.bounds;
        let panned = Viewport::new(
            BoundingBox::new(b.west + dx, b.south, b.east + dx, b.north),
            viewport.zoom,
        );
        let after = query(&index, &panned, 0.0);
        pool.reconcile(&after, &panned.bounds);

        for (id, slot_index) in slots_before {
            if after.iter().any(|f| f.feature_id == id) {
                let slot = pool.slot_for(id);
                prop_assert!(slot.is_some());
                prop_assert_eq!(slot.map(|s| s.slot_index()), Some(slot_index));
            }
        }
    }
}
