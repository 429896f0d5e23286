//! POI Cluster Library - Clustering and Pooled Marker Rendering Core
//!
//! This library turns a large, changing set of geotagged points into a bounded set of
//! on-screen markers. Points are aggregated into clusters per zoom level, and the visible
//! clusters are mapped onto a fixed-size pool of rendering slots whose identity survives
//! panning, zooming and cluster/single mode changes.
//!
//! # Architecture
//!
//! - **[`Point`]**: Validated, immutable input record (see [`ingest`])
//! - **[`SpatialIndex`]**: Per-zoom cluster hierarchy built by greedy radius agglomeration
//! - **[`query`]**: Viewport lookup into one level of the hierarchy
//! - **[`PoolAssigner`]**: Maps visible features onto `N` reusable slots
//! - **[`ModeTransitionController`]**: Per-slot appear/disappear and cluster/single morphs
//! - **[`MarkerLayer`]**: High-level owner wiring the pieces together for a host
//!
//! # Performance Characteristics
//!
//! - **Build Time**: O(N log N) per zoom level, using a point quadtree for neighbor lookups
//! - **Query Time**: O(log N + K) where K = visible features
//! - **Reconcile Time**: O(S × F log(S × F)) where S = pool capacity, F = visible features

mod assign;
mod config;
mod diagnostics;
mod feature;
mod handle;
mod index;
mod layer;
mod point;
mod quadtree;
mod query;
mod schedule;
mod transition;
pub mod utils;

// Public API exports
pub use assign::{DisplayMode, PoolAssigner, PoolSlot, ReconcileStats, Reconciliation, reconcile};
pub use config::ClusterConfig;
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use feature::{ClusterFeature, FeatureId};
pub use handle::IndexHandle;
pub use index::{IndexParams, SpatialIndex, TapTarget};
pub use layer::{MarkerLayer, PoolSnapshot, SlotView};
pub use point::{IngestReport, Ingested, IngestionError, Point, PointId, ingest};
pub use query::{BoundingBox, Viewport, query};
pub use schedule::{Ticket, ViewportScheduler};
pub use transition::{ModeTransitionController, Morph, Phase, SlotVisual, TransitionStats};

/// Error types for the clustering core
///
/// Only configuration problems are surfaced as hard errors. Malformed points, degenerate
/// viewports and pool overflow are all recovered locally (see [`ingest`], [`query`] and
/// [`PoolAssigner`]).
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type Result<T> = std::result::Result<T, ClusterError>;
