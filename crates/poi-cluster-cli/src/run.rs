//! Scripted headless session: load points, sweep a viewport across zoom levels, report

use crate::error::{CliError, Result};
use crate::host::{Host, HostHealth};
use crate::settings::Settings;
use crate::source::{load_points, synthetic_points};
use poi_cluster_lib::utils::{px_to_unit, unit_x_to_lon, unit_y_to_lat, wgs84_to_unit};
use poi_cluster_lib::{BoundingBox, DiagnosticsSnapshot, MarkerLayer, PoolSnapshot, Viewport};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Final state of a session, written as JSON
#[derive(Debug, Serialize)]
pub struct Report {
    pub frames: usize,
    pub health: HostHealth,
    pub drawn: usize,
    pub snapshot: PoolSnapshot,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Run a session and write its report to the configured output
pub async fn execute(settings: Settings) -> Result<()> {
    let report = run(&settings).await?;
    write_report(&report, &settings)
}

/// Run a session: build the index, then drive the layer for the configured frames
pub async fn run(settings: &Settings) -> Result<Report> {
    let config = settings.cluster_config()?;
    let frame_interval = config.frame_interval();
    let tile_size = config.tile_size;
    let mut host = Host::new(MarkerLayer::new(config)?);

    let mut points = match &settings.points {
        Some(path) => load_points(path)?,
        None => Vec::new(),
    };
    if settings.synthetic > 0 {
        let first_id = points.iter().map(|p| p.id.0 + 1).max().unwrap_or(0);
        points.extend(
            synthetic_points(settings.synthetic, settings.center_lat, settings.center_lon)
                .into_iter()
                .map(|mut p| {
                    p.id.0 += first_id;
                    p
                }),
        );
    }
    if points.is_empty() {
        tracing::warn!("No points given, the map will stay empty");
    }

    host.submit_points(points);
    host.wait_for_index().await?;
    if matches!(host.health(), HostHealth::Failed { .. }) {
        host.recover();
        host.wait_for_index().await?;
    }

    let mut ticker = tokio::time::interval(frame_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for frame in 0..settings.frames {
        ticker.tick().await;
        host.submit_viewport(scripted_viewport(settings, frame, tile_size));
        let snapshot = host.frame(instant::Instant::now());
        tracing::trace!(
            "Frame {}: {} of {} slots drawn",
            frame,
            snapshot.drawn().count(),
            snapshot.len()
        );
    }

    let snapshot = host.settle().await;
    let report = Report {
        frames: settings.frames,
        health: host.health().clone(),
        drawn: snapshot.drawn().count(),
        snapshot,
        diagnostics: host.layer().diagnostics(),
    };
    tracing::info!(
        "Session done: {} frames, {} markers drawn, {:?}",
        report.frames,
        report.drawn,
        report.diagnostics
    );
    Ok(report)
}

fn write_report(report: &Report, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match &settings.output {
        Some(path) => std::fs::write(path, json).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        }),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").map_err(|source| CliError::Io {
                path: "<stdout>".into(),
                source,
            })
        }
    }
}

/// Viewport for one frame of the scripted sweep
///
/// The zoom moves linearly from `zoom_from` to `zoom_to` while the center drifts east
/// by a tenth of the screen width over the whole session.
fn scripted_viewport(settings: &Settings, frame: usize, tile_size: f64) -> Viewport {
    let t = if settings.frames > 1 {
        frame as f64 / (settings.frames - 1) as f64
    } else {
        0.0
    };
    let zoom_from = f64::from(settings.zoom_from);
    let zoom_to = f64::from(settings.zoom_to);
    let zoom = (zoom_from + (zoom_to - zoom_from) * t).round() as u8;

    let (width, height) = settings.screen;
    let drift = px_to_unit(f64::from(width) * 0.1 * t, zoom, tile_size);
    let mut center = wgs84_to_unit(settings.center_lat, settings.center_lon);
    center.x += drift;

    Viewport::new(screen_bounds(center, zoom, (width, height), tile_size), zoom)
}

/// Geographic bounds of a screen of `size` pixels centered on a unit coordinate
fn screen_bounds(
    center: geo::Coord<f64>,
    zoom: u8,
    size: (u32, u32),
    tile_size: f64,
) -> BoundingBox {
    let half_w = px_to_unit(f64::from(size.0) / 2.0, zoom, tile_size);
    let half_h = px_to_unit(f64::from(size.1) / 2.0, zoom, tile_size);

    let (west, east) = if half_w >= 0.5 {
        (-180.0, 180.0)
    } else {
        (
            wrap_unit_x(center.x - half_w),
            wrap_unit_x(center.x + half_w),
        )
    };
    let north = unit_y_to_lat((center.y - half_h).max(0.0));
    let south = unit_y_to_lat((center.y + half_h).min(1.0));
    BoundingBox::new(west, south, east, north)
}

fn wrap_unit_x(x: f64) -> f64 {
    let lon = unit_x_to_lon(x.rem_euclid(1.0));
    if lon >= 180.0 { lon - 360.0 } else { lon }
}
