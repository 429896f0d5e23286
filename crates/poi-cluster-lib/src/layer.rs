//! MarkerLayer - the host-facing owner of the clustering pipeline
//!
//! Wires the index handle, pool assigner, transition controller and viewport scheduler
//! together. The layer itself is owned by a single thread (the host's frame loop); only
//! index construction is expected to happen elsewhere, after which the result is
//! handed over with [`MarkerLayer::install`].

use crate::assign::{DisplayMode, PoolAssigner};
use crate::config::ClusterConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::feature::{ClusterFeature, FeatureId};
use crate::handle::IndexHandle;
use crate::index::{IndexParams, SpatialIndex, TapTarget};
use crate::point::Point;
use crate::query::{Viewport, query};
use crate::schedule::{Ticket, ViewportScheduler};
use crate::transition::{ModeTransitionController, Morph, Phase, SlotVisual};
use crate::{PoolSlot, Result};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Read-only view of one slot for the renderer
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotView {
    pub slot_index: usize,
    pub phase: Phase,
    pub mode: DisplayMode,
    pub feature_id: Option<FeatureId>,
    pub point_count: usize,
    pub aggregated_weight: f64,
    /// (latitude, longitude) of the presented feature
    pub position: Option<(f64, f64)>,
    pub progress: f32,
    pub morph: Option<Morph>,
}

impl SlotView {
    fn new(slot: &PoolSlot, visual: SlotVisual) -> Self {
        let feature = visual.feature.as_ref();
        Self {
            slot_index: slot.slot_index(),
            phase: visual.phase,
            mode: visual.mode,
            feature_id: feature.map(|f| f.feature_id),
            point_count: feature.map_or(0, |f| f.point_count),
            aggregated_weight: feature.map_or(0.0, |f| f.aggregated_weight),
            position: feature.map(|f| (f.centroid_lat(), f.centroid_lon())),
            progress: visual.progress,
            morph: visual.morph,
        }
    }

    /// Key the renderer must use for this slot's element
    ///
    /// Always the slot index, never the mode or feature, so an element survives
    /// reassignment and cluster/single morphs.
    #[inline]
    pub fn render_key(&self) -> usize {
        self.slot_index
    }

    /// Whether anything is drawn for this slot this frame
    #[inline]
    pub fn is_drawn(&self) -> bool {
        self.phase != Phase::Hidden
    }
}

/// Immutable list of all slots, ordered by slot index
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PoolSnapshot(Arc<[SlotView]>);

impl PoolSnapshot {
    #[inline]
    pub fn slots(&self) -> &[SlotView] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Slots that currently draw something
    pub fn drawn(&self) -> impl Iterator<Item = &SlotView> + '_ {
        self.0.iter().filter(|s| s.is_drawn())
    }

    /// Slot showing a feature, if any
    pub fn find(&self, id: FeatureId) -> Option<&SlotView> {
        self.0.iter().find(|s| s.feature_id == Some(id))
    }
}

/// Marker layer driving the clustering and pooled rendering of one map
#[derive(Debug)]
pub struct MarkerLayer {
    config: ClusterConfig,
    index: IndexHandle,
    pool: PoolAssigner,
    transitions: ModeTransitionController,
    scheduler: ViewportScheduler,
    diagnostics: Arc<Diagnostics>,
    snapshot: PoolSnapshot,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MarkerLayer {
    /// Create a layer with an empty pool and no index
    pub fn new(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let mut layer = Self {
            index: IndexHandle::new(),
            pool: PoolAssigner::new(config.pool_capacity),
            transitions: ModeTransitionController::new(
                config.pool_capacity,
                config.transition_frames,
            ),
            scheduler: ViewportScheduler::new(config.frame_interval()),
            diagnostics: Arc::new(Diagnostics::default()),
            snapshot: PoolSnapshot::default(),
            config,
        };
        layer.refresh_snapshot();

        tracing::info!(
            "Marker layer ready: {} slots, radius {} px, zoom {}..={}",
            layer.config.pool_capacity,
            layer.config.pixel_radius,
            layer.config.min_zoom,
            layer.config.max_zoom
        );
        Ok(layer)
    }

    #[inline]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Index parameters derived from the configuration
    #[inline]
    pub fn index_params(&self) -> IndexParams {
        IndexParams::from(&self.config)
    }

    /// Shared handle to the current index, for builders running on other threads
    pub fn index_handle(&self) -> IndexHandle {
        self.index.clone()
    }

    /// Shared diagnostic counters
    pub fn diagnostics_handle(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.diagnostics)
    }

    #[inline]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Build an index from a point batch on the calling thread and install it
    pub fn set_points(&self, points: impl IntoIterator<Item = Point>) -> u64 {
        self.install(SpatialIndex::build(points, self.index_params()))
    }

    /// Install an index built elsewhere, returning its generation
    pub fn install(&self, index: impl Into<Arc<SpatialIndex>>) -> u64 {
        let index = index.into();
        self.diagnostics
            .record_rebuild(index.ingest_report().dropped());
        self.index.replace(index)
    }

    /// Features visible in a viewport, empty while no index is installed
    pub fn query_features(&self, viewport: &Viewport) -> Vec<ClusterFeature> {
        self.diagnostics.record_query();
        match self.index.snapshot() {
            Some(index) => query(&index, viewport, self.config.viewport_margin_px()),
            None => {
                tracing::trace!("No index installed yet, returning no features");
                Vec::new()
            }
        }
    }

    /// Queue a viewport change; see [`ViewportScheduler`]
    pub fn submit_viewport(&mut self, viewport: Viewport) -> Ticket {
        self.scheduler.submit(viewport)
    }

    /// Take the viewport due for querying this frame, if any
    pub fn poll_viewport(&mut self, now: instant::Instant) -> Option<(Ticket, Viewport)> {
        self.scheduler.poll(now)
    }

    /// Apply query results computed for `ticket`
    ///
    /// Results for a ticket that has been superseded are discarded and `None` is
    /// returned.
    pub fn apply(
        &mut self,
        ticket: Ticket,
        viewport: &Viewport,
        features: &[ClusterFeature],
    ) -> Option<PoolSnapshot> {
        if !self.scheduler.is_current(ticket) {
            self.diagnostics.record_stale_result();
            tracing::trace!("Discarding results for superseded {:?}", ticket);
            return None;
        }
        Some(self.reconcile(viewport, features))
    }

    /// Query and reconcile a viewport synchronously, bypassing the scheduler
    pub fn update(&mut self, viewport: &Viewport) -> PoolSnapshot {
        let features = self.query_features(viewport);
        self.reconcile(viewport, &features)
    }

    /// Run one frame: dispatch a due viewport, if any, then advance animations
    pub fn frame(&mut self, now: instant::Instant) -> PoolSnapshot {
        if let Some((_, viewport)) = self.scheduler.poll(now) {
            self.update(&viewport);
        }
        self.tick()
    }

    fn reconcile(&mut self, viewport: &Viewport, features: &[ClusterFeature]) -> PoolSnapshot {
        let (evicted, stats) = self.pool.reconcile(features, &viewport.bounds);
        let transitions = self.transitions.update(self.pool.slots());
        self.diagnostics
            .record_reconcile(evicted.len(), transitions.morphing);

        if !evicted.is_empty() {
            tracing::debug!(
                "Pool full: {} of {} visible features evicted",
                evicted.len(),
                features.len()
            );
        }
        tracing::trace!("Reconcile {:?}, transitions {:?}", stats, transitions);

        self.refresh_snapshot();
        self.snapshot.clone()
    }

    /// Advance animations by one frame
    pub fn tick(&mut self) -> PoolSnapshot {
        if self.transitions.is_animating() {
            self.transitions.tick();
            self.refresh_snapshot();
        }
        self.snapshot.clone()
    }

    pub fn is_animating(&self) -> bool {
        self.transitions.is_animating()
    }

    /// The most recent pool snapshot
    #[inline]
    pub fn snapshot(&self) -> PoolSnapshot {
        self.snapshot.clone()
    }

    /// Resolve a tapped marker against the current index
    pub fn resolve_tap(&self, id: FeatureId) -> Option<TapTarget> {
        self.index.snapshot()?.resolve_tap(id)
    }

    fn refresh_snapshot(&mut self) {
        let views: Vec<SlotView> = self
            .pool
            .slots()
            .iter()
            .zip(self.transitions.visuals())
            .map(|(slot, visual)| SlotView::new(slot, visual))
            .collect();
        self.snapshot = PoolSnapshot(views.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClusterError;
    use crate::query::BoundingBox;

    fn config(pool_capacity: usize) -> ClusterConfig {
        ClusterConfig {
            pool_capacity,
            transition_frames: 2,
            ..ClusterConfig::default()
        }
    }

    fn square_cluster() -> Vec<Point> {
        // Four points within a few metres: one cluster below zoom 16
        vec![
            Point::new(1, 40.0, -3.0),
            Point::new(2, 40.00001, -3.0),
            Point::new(3, 40.0, -3.00001),
            Point::new(4, 40.00001, -3.00001),
        ]
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = MarkerLayer::new(ClusterConfig {
            min_zoom: 12,
            max_zoom: 4,
            ..ClusterConfig::default()
        });
        assert!(matches!(result, Err(ClusterError::InvalidConfig { .. })));
    }

    #[test]
    fn test_queries_before_first_build_are_empty() {
        let mut layer = MarkerLayer::new(config(4)).unwrap();
        let viewport = Viewport::new(BoundingBox::new(-10.0, -10.0, 10.0, 10.0), 5);
        assert!(layer.query_features(&viewport).is_empty());

        let snapshot = layer.update(&viewport);
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.drawn().count(), 0);
        assert!(layer.resolve_tap(FeatureId(1)).is_none());
    }

    #[test]
    fn test_cluster_keeps_id_and_slot_across_frames() {
        let mut layer = MarkerLayer::new(config(4)).unwrap();
        layer.set_points(square_cluster());
        let viewport = Viewport::new(BoundingBox::new(-3.1, 39.9, -2.9, 40.1), 12);

        let first = layer.update(&viewport);
        let view = first.drawn().next().unwrap().clone();
        assert_eq!(view.point_count, 4);
        assert_eq!(view.mode, DisplayMode::Cluster);

        // Same point set, same zoom, slightly panned
        let panned = Viewport::new(BoundingBox::new(-3.09, 39.91, -2.89, 40.11), 12);
        let second = layer.update(&panned);
        let again = second.find(view.feature_id.unwrap()).unwrap();
        assert_eq!(again.slot_index, view.slot_index);
        assert_eq!(again.render_key(), view.render_key());
    }

    #[test]
    fn test_zooming_in_morphs_the_same_slot() {
        let mut layer = MarkerLayer::new(config(8)).unwrap();
        layer.set_points(square_cluster());
        let bounds = BoundingBox::new(-3.001, 39.999, -2.999, 40.001);

        let clustered = layer.update(&Viewport::new(bounds, 12));
        let cluster_view = clustered.drawn().next().unwrap().clone();
        layer.tick();
        layer.tick();

        let split = layer.update(&Viewport::new(bounds, 16));
        assert_eq!(split.drawn().count(), 4);
        let heir = &split.slots()[cluster_view.slot_index];
        assert_eq!(heir.mode, DisplayMode::Single);
        assert_eq!(heir.phase, Phase::Idle);
        assert!(heir.morph.is_some());
        assert_eq!(layer.diagnostics().morphs, 1);
    }

    #[test]
    fn test_stale_results_are_discarded() {
        let mut layer = MarkerLayer::new(config(4)).unwrap();
        layer.set_points(square_cluster());
        let viewport = Viewport::new(BoundingBox::new(-3.1, 39.9, -2.9, 40.1), 12);

        let old = layer.submit_viewport(viewport);
        let features = layer.query_features(&viewport);
        let new = layer.submit_viewport(viewport);

        assert!(layer.apply(old, &viewport, &features).is_none());
        assert!(layer.apply(new, &viewport, &features).is_some());
        assert_eq!(layer.diagnostics().stale_results, 1);
    }

    #[test]
    fn test_tap_resolution_and_diagnostics() {
        let mut layer = MarkerLayer::new(config(1)).unwrap();
        let mut points = square_cluster();
        points.push(Point::new(9, f64::NAN, 0.0));
        points.push(Point::new(10, 10.0, 10.0));
        layer.set_points(points);

        let snapshot = layer.update(&Viewport::new(BoundingBox::new(-20.0, -20.0, 20.0, 50.0), 12));
        let shown = snapshot.drawn().next().unwrap();
        // The heavier cluster wins the single slot
        assert_eq!(shown.point_count, 4);

        match layer.resolve_tap(shown.feature_id.unwrap()) {
            Some(TapTarget::Cluster { members, .. }) => assert_eq!(members.len(), 4),
            other => panic!("unexpected tap target {other:?}"),
        }

        let diagnostics = layer.diagnostics();
        assert_eq!(diagnostics.dropped_points, 1);
        assert_eq!(diagnostics.rebuilds, 1);
        assert_eq!(diagnostics.last_query_evictions, 1);
    }

    #[test]
    fn test_frame_respects_scheduler() {
        let mut layer = MarkerLayer::new(config(4)).unwrap();
        layer.set_points(square_cluster());
        let viewport = Viewport::new(BoundingBox::new(-3.1, 39.9, -2.9, 40.1), 12);

        layer.submit_viewport(viewport);
        let snapshot = layer.frame(instant::Instant::now());
        assert_eq!(snapshot.drawn().count(), 1);
        assert!(!layer.frame(instant::Instant::now()).is_empty());
        assert_eq!(layer.diagnostics().queries, 1);
    }
}
