//! PoolAssigner - maps visible features onto a fixed set of rendering slots
//!
//! Each reconciliation runs four steps in a fixed order:
//!
//! 1. **Evict**: when more features are visible than there are slots, keep the `N`
//!    heaviest (ties: closest to the viewport center, then lowest feature id).
//! 2. **Retain**: a slot keeps its feature when that feature is still visible. A slot
//!    also keeps following its feature's lineage: when the feature it showed merged into
//!    a cluster or split apart, the visible feature with the same anchor takes the slot.
//!    This is how a marker morphs between cluster and single display in place.
//! 3. **Hide**: slots whose feature disappeared turn hidden but keep their assignment for
//!    one more cycle, so a feature flickering at the viewport edge finds its slot again.
//!    Slots that were already lingering are freed.
//! 4. **Fill**: the remaining features take free slots, nearest `last_centroid` first
//!    (ties: lowest feature id, then lowest slot index). Lingering slots are only used
//!    once no free slot is left.

use crate::feature::{ClusterFeature, FeatureId};
use crate::query::BoundingBox;
use crate::utils;
use geo::Coord;
use rustc_hash::{FxHashMap, FxHashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a slot is currently presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DisplayMode {
    /// Aggregate marker standing in for several points
    Cluster,
    /// Marker for one point
    Single,
    /// Not rendered
    Hidden,
}

impl DisplayMode {
    /// Display mode a feature is shown with
    #[inline]
    pub fn for_feature(feature: &ClusterFeature) -> Self {
        if feature.is_cluster() {
            Self::Cluster
        } else {
            Self::Single
        }
    }
}

/// One reusable rendering slot
///
/// The slot index is fixed when the pool is created. Only the assignment, the display
/// mode and the last known centroid change over time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolSlot {
    slot_index: usize,
    /// Assigned feature; kept while the slot lingers hidden
    feature: Option<ClusterFeature>,
    display_mode: DisplayMode,
    /// Centroid of the last feature shown, in unit space; survives freeing
    last_centroid: Option<Coord<f64>>,
}

impl PoolSlot {
    /// An empty, hidden slot
    pub fn empty(slot_index: usize) -> Self {
        Self {
            slot_index,
            feature: None,
            display_mode: DisplayMode::Hidden,
            last_centroid: None,
        }
    }

    fn show(&mut self, feature: &ClusterFeature) {
        self.display_mode = DisplayMode::for_feature(feature);
        self.last_centroid = Some(feature.unit_position());
        self.feature = Some(feature.clone());
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// Id of the assigned feature, including while lingering
    #[inline]
    pub fn assigned(&self) -> Option<FeatureId> {
        self.feature.as_ref().map(|f| f.feature_id)
    }

    #[inline]
    pub fn feature(&self) -> Option<&ClusterFeature> {
        self.feature.as_ref()
    }

    #[inline]
    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Last centroid shown by this slot as (latitude, longitude)
    pub fn last_centroid(&self) -> Option<(f64, f64)> {
        self.last_centroid.map(utils::unit_to_wgs84)
    }

    /// Whether the renderer should draw this slot
    #[inline]
    pub fn is_visible(&self) -> bool {
        self.display_mode != DisplayMode::Hidden
    }

    /// Hidden with no assignment: available for reuse
    #[inline]
    pub fn is_free(&self) -> bool {
        self.feature.is_none()
    }

    /// Hidden but still holding the assignment from the previous cycle
    #[inline]
    pub fn is_lingering(&self) -> bool {
        !self.is_visible() && self.feature.is_some()
    }
}

/// Counters describing one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconcileStats {
    /// Slots that kept the exact same feature
    pub retained: usize,
    /// Slots that followed their feature's lineage into a merged or split feature
    pub rebound: usize,
    /// Slots that received a new feature
    pub filled: usize,
    /// Slots that turned hidden this cycle and now linger
    pub hidden: usize,
    /// Lingering slots that were released
    pub freed: usize,
}

/// Output of [`reconcile`]
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The new pool state, same length and slot order as the input
    pub slots: Vec<PoolSlot>,
    /// Visible features dropped because the pool was full
    pub evicted: Vec<FeatureId>,
    pub stats: ReconcileStats,
}

/// Keep at most `capacity` features: heaviest first, then closest to `center`
fn evict(
    visible: &[ClusterFeature],
    capacity: usize,
    center: Coord<f64>,
) -> (Vec<&ClusterFeature>, Vec<FeatureId>) {
    let mut seen: FxHashSet<FeatureId> = FxHashSet::default();
    let mut candidates: Vec<(&ClusterFeature, f64)> = visible
        .iter()
        .filter(|f| seen.insert(f.feature_id))
        .map(|f| (f, utils::wrapped_distance_sq(f.unit_position(), center)))
        .collect();

    if candidates.len() <= capacity {
        return (candidates.into_iter().map(|(f, _)| f).collect(), Vec::new());
    }

    candidates.sort_by(|(a, da), (b, db)| {
        b.aggregated_weight
            .total_cmp(&a.aggregated_weight)
            .then_with(|| da.total_cmp(db))
            .then_with(|| a.feature_id.cmp(&b.feature_id))
    });
    let evicted = candidates[capacity..]
        .iter()
        .map(|(f, _)| f.feature_id)
        .collect();
    candidates.truncate(capacity);
    (candidates.into_iter().map(|(f, _)| f).collect(), evicted)
}

/// Greedily pair unassigned features with candidate slots, nearest first
///
/// Returns the number of assignments made.
fn fill(
    slots: &mut [PoolSlot],
    candidates: &[usize],
    features: &[&ClusterFeature],
    pending: &mut [bool],
) -> usize {
    let mut pairs: Vec<(f64, FeatureId, usize, usize)> = Vec::new();
    for (fi, feature) in features.iter().enumerate() {
        if !pending[fi] {
            continue;
        }
        let unit = feature.unit_position();
        for &si in candidates {
            let distance = slots[si]
                .last_centroid
                .map_or(f64::INFINITY, |c| utils::wrapped_distance_sq(c, unit));
            pairs.push((distance, feature.feature_id, slots[si].slot_index, fi));
        }
    }
    pairs.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let position: FxHashMap<usize, usize> = candidates
        .iter()
        .map(|&si| (slots[si].slot_index, si))
        .collect();
    let mut taken = vec![false; slots.len()];
    let mut filled = 0;
    for (_, _, slot_index, fi) in pairs {
        let Some(&si) = position.get(&slot_index) else {
            continue;
        };
        if !pending[fi] || taken[si] {
            continue;
        }
        taken[si] = true;
        pending[fi] = false;
        slots[si].show(features[fi]);
        filled += 1;
    }
    filled
}

/// Reconcile a previous pool state against the currently visible features
///
/// Pure and deterministic. The result always has exactly `previous.len()` slots, every
/// slot keeps its index, no feature id is shown by more than one slot, and at most
/// `previous.len()` slots are visible. Features that do not fit are reported in
/// [`Reconciliation::evicted`] instead of failing.
pub fn reconcile(
    previous: &[PoolSlot],
    visible: &[ClusterFeature],
    viewport: &BoundingBox,
) -> Reconciliation {
    #[cfg(feature = "profiling")]
    profiling::scope!("assign::reconcile");

    let capacity = previous.len();
    let (kept, evicted) = evict(visible, capacity, viewport.center_unit());

    let mut slots: Vec<PoolSlot> = previous.to_vec();
    let mut stats = ReconcileStats::default();
    let mut pending = vec![true; kept.len()];
    let mut matched = vec![false; capacity];

    // Retain exact ids
    let by_id: FxHashMap<FeatureId, usize> = kept
        .iter()
        .enumerate()
        .map(|(i, f)| (f.feature_id, i))
        .collect();
    for (si, slot) in slots.iter_mut().enumerate() {
        let Some(&fi) = slot.assigned().and_then(|id| by_id.get(&id)) else {
            continue;
        };
        if pending[fi] {
            pending[fi] = false;
            matched[si] = true;
            slot.show(kept[fi]);
            stats.retained += 1;
        }
    }

    // Follow lineage through merges and splits
    let by_anchor: FxHashMap<_, usize> = kept
        .iter()
        .enumerate()
        .filter(|(i, _)| pending[*i])
        .map(|(i, f)| (f.anchor, i))
        .collect();
    for (si, slot) in slots.iter_mut().enumerate() {
        if matched[si] {
            continue;
        }
        let Some(&fi) = slot.feature().and_then(|f| by_anchor.get(&f.anchor)) else {
            continue;
        };
        if pending[fi] {
            pending[fi] = false;
            matched[si] = true;
            slot.show(kept[fi]);
            stats.rebound += 1;
        }
    }

    // Hide what vanished, release what already lingered
    let mut free: Vec<usize> = Vec::new();
    let mut lingering: Vec<usize> = Vec::new();
    for (si, slot) in slots.iter_mut().enumerate() {
        if matched[si] {
            continue;
        }
        if slot.is_visible() {
            slot.display_mode = DisplayMode::Hidden;
            lingering.push(si);
            stats.hidden += 1;
        } else {
            if slot.feature.take().is_some() {
                stats.freed += 1;
            }
            free.push(si);
        }
    }

    stats.filled += fill(&mut slots, &free, &kept, &mut pending);
    if pending.iter().any(|&p| p) {
        stats.filled += fill(&mut slots, &lingering, &kept, &mut pending);
    }
    debug_assert!(pending.iter().all(|&p| !p));

    tracing::trace!(
        "Reconciled {} visible features into {} slots: {:?}, {} evicted",
        visible.len(),
        capacity,
        stats,
        evicted.len()
    );

    Reconciliation {
        slots,
        evicted,
        stats,
    }
}

/// Owner of the slot pool across frames
#[derive(Debug, Clone)]
pub struct PoolAssigner {
    slots: Vec<PoolSlot>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PoolAssigner {
    /// Create a pool of `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(PoolSlot::empty).collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current slot states, ordered by slot index
    #[inline]
    pub fn slots(&self) -> &[PoolSlot] {
        &self.slots
    }

    /// Number of slots the renderer draws
    pub fn visible_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_visible()).count()
    }

    /// Slot currently showing a feature
    pub fn slot_for(&self, id: FeatureId) -> Option<&PoolSlot> {
        self.slots
            .iter()
            .find(|s| s.is_visible() && s.assigned() == Some(id))
    }

    /// Reconcile the pool against a new visible set
    ///
    /// Returns the evicted feature ids and the step counters.
    pub fn reconcile(
        &mut self,
        visible: &[ClusterFeature],
        viewport: &BoundingBox,
    ) -> (Vec<FeatureId>, ReconcileStats) {
        let Reconciliation {
            slots,
            evicted,
            stats,
        } = reconcile(&self.slots, visible, viewport);
        self.slots = slots;
        (evicted, stats)
    }
}
