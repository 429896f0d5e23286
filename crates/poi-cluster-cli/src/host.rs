//! Host side of the marker layer: async index builds and latest-wins viewport queries
//!
//! The host owns the [`MarkerLayer`] and runs its frame loop on one task. Index
//! construction runs on the blocking pool, fed by a watch channel so that a newer point
//! batch supersedes one that has not been picked up yet. Viewport queries are dispatched
//! to the blocking pool as well; their results come back over a channel and are applied
//! only if their ticket is still the latest one.

use poi_cluster_lib::{
    ClusterFeature, Diagnostics, IndexHandle, IndexParams, MarkerLayer, Point, PoolSnapshot,
    SpatialIndex, Ticket, Viewport, query,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{CliError, Result};
use crate::runtime;

/// Function used to build an index from a point batch
pub type BuildFn = Arc<dyn Fn(&[Point], IndexParams) -> SpatialIndex + Send + Sync>;

/// Health of the host around the rendering surface
///
/// A failure does not tear anything down: the last good index stays installed and
/// [`Host::recover`] re-runs the index build for the latest batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HostHealth {
    Healthy,
    Failed { reason: String },
    Recovering,
}

#[derive(Debug)]
enum BuildOutcome {
    Installed { generation: u64, points: usize },
    Failed { reason: String },
}

#[derive(Debug)]
struct QueryResult {
    ticket: Ticket,
    viewport: Viewport,
    features: Vec<ClusterFeature>,
}

pub struct Host {
    layer: MarkerLayer,
    health: HostHealth,
    batches: watch::Sender<Arc<[Point]>>,
    builds: mpsc::UnboundedReceiver<BuildOutcome>,
    results_tx: mpsc::UnboundedSender<QueryResult>,
    results_rx: mpsc::UnboundedReceiver<QueryResult>,
    in_flight: usize,
    builder: JoinHandle<()>,
}

impl Host {
    /// Create a host around `layer`; must be called from within a tokio runtime
    pub fn new(layer: MarkerLayer) -> Self {
        Self::with_builder(layer, Arc::new(|points: &[Point], params: IndexParams| {
            SpatialIndex::build(points.iter().copied(), params)
        }))
    }

    /// Create a host with a custom index build function
    pub fn with_builder(layer: MarkerLayer, build: BuildFn) -> Self {
        let (batches, batches_rx) = watch::channel::<Arc<[Point]>>(Arc::from([]));
        let (builds_tx, builds) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        debug_assert!(
            runtime::in_runtime_context(),
            "Host must be created inside a tokio runtime"
        );
        let builder = runtime::spawn(run_builder(
            batches_rx,
            layer.index_params(),
            layer.index_handle(),
            layer.diagnostics_handle(),
            build,
            builds_tx,
        ));

        Self {
            layer,
            health: HostHealth::Healthy,
            batches,
            builds,
            results_tx,
            results_rx,
            in_flight: 0,
            builder,
        }
    }

    #[inline]
    pub fn layer(&self) -> &MarkerLayer {
        &self.layer
    }

    #[inline]
    pub fn health(&self) -> &HostHealth {
        &self.health
    }

    /// Hand a new point batch to the index builder
    pub fn submit_points(&self, points: Vec<Point>) {
        tracing::debug!("Submitting batch of {} points", points.len());
        self.batches.send_replace(points.into());
    }

    /// Record a failure reported by the rendering surface
    pub fn report_failure(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Host failure reported: {reason}");
        self.health = HostHealth::Failed { reason };
    }

    /// Rebuild the index for the latest batch after a failure
    pub fn recover(&mut self) {
        if !matches!(self.health, HostHealth::Failed { .. }) {
            return;
        }
        tracing::info!("Recovering: rebuilding index for the latest batch");
        self.health = HostHealth::Recovering;
        self.batches.send_modify(|_| {});
    }

    /// Wait for the next build to finish, successfully or not
    pub async fn wait_for_index(&mut self) -> Result<()> {
        let outcome = self.builds.recv().await.ok_or(CliError::BuilderGone)?;
        self.handle_build(outcome);
        Ok(())
    }

    /// Queue a viewport change
    pub fn submit_viewport(&mut self, viewport: Viewport) -> Ticket {
        self.layer.submit_viewport(viewport)
    }

    /// Run one frame of the host loop
    pub fn frame(&mut self, now: instant::Instant) -> PoolSnapshot {
        self.drain_builds();
        self.dispatch_due(now);
        self.drain_results();
        self.layer.tick()
    }

    /// Wait for every in-flight query and apply what is still current
    pub async fn settle(&mut self) -> PoolSnapshot {
        while self.in_flight > 0 {
            match self.results_rx.recv().await {
                Some(result) => self.apply(result),
                None => break,
            }
        }
        self.drain_builds();
        self.layer.snapshot()
    }

    /// Start a query for the viewport due this frame, if any
    fn dispatch_due(&mut self, now: instant::Instant) {
        let Some((ticket, viewport)) = self.layer.poll_viewport(now) else {
            return;
        };

        let index = self.layer.index_handle().snapshot();
        let margin = self.layer.config().viewport_margin_px();
        let diagnostics = self.layer.diagnostics_handle();
        let results = self.results_tx.clone();
        self.in_flight += 1;

        runtime::spawn_blocking(move || {
            diagnostics.record_query();
            let features = index
                .map(|index| query(&index, &viewport, margin))
                .unwrap_or_default();
            // The host may be gone already; its results are not wanted then
            let _ = results.send(QueryResult {
                ticket,
                viewport,
                features,
            });
        });
    }

    fn drain_results(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            self.apply(result);
        }
    }

    fn apply(&mut self, result: QueryResult) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.layer
            .apply(result.ticket, &result.viewport, &result.features);
    }

    fn drain_builds(&mut self) {
        while let Ok(outcome) = self.builds.try_recv() {
            self.handle_build(outcome);
        }
    }

    fn handle_build(&mut self, outcome: BuildOutcome) {
        match outcome {
            BuildOutcome::Installed { generation, points } => {
                if self.health != HostHealth::Healthy {
                    tracing::info!("Host healthy again with index generation {generation}");
                }
                tracing::debug!("Index generation {generation} ready with {points} points");
                self.health = HostHealth::Healthy;
            }
            BuildOutcome::Failed { reason } => {
                self.health = HostHealth::Failed { reason };
            }
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.builder.abort();
    }
}

/// Build indexes for incoming batches until the host goes away
async fn run_builder(
    mut batches: watch::Receiver<Arc<[Point]>>,
    params: IndexParams,
    handle: IndexHandle,
    diagnostics: Arc<Diagnostics>,
    build: BuildFn,
    outcomes: mpsc::UnboundedSender<BuildOutcome>,
) {
    while batches.changed().await.is_ok() {
        let batch = batches.borrow_and_update().clone();
        let build = Arc::clone(&build);
        let started = instant::Instant::now();

        let result = runtime::spawn_blocking(move || build(&batch, params)).await;
        let outcome = match result {
            Ok(index) => {
                if batches.has_changed().unwrap_or(false) {
                    tracing::debug!("Discarding index for a superseded batch");
                    continue;
                }
                diagnostics.record_rebuild(index.ingest_report().dropped());
                let points = index.point_count();
                let generation = handle.replace(index);
                tracing::info!(
                    "Index generation {} installed: {} points in {:.1} ms",
                    generation,
                    points,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                BuildOutcome::Installed { generation, points }
            }
            Err(error) => {
                let reason = if error.is_panic() {
                    panic_reason(error.into_panic())
                } else {
                    error.to_string()
                };
                tracing::error!("Index build failed: {reason}");
                BuildOutcome::Failed { reason }
            }
        };

        if outcomes.send(outcome).is_err() {
            break;
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "index build panicked".to_string()
    }
}
