//! Point records and batch ingestion
//!
//! Points are validated once, when a batch enters the system. Invalid points are
//! dropped and counted instead of failing the batch.

use crate::utils;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identifier of a point of interest, supplied by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PointId(pub u64);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geotagged point of interest
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub id: PointId,
    pub latitude: f64,
    pub longitude: f64,
    /// Aggregate significance (e.g. a count). Defaults to 1.
    #[cfg_attr(feature = "serde", serde(default = "default_weight"))]
    pub weight: f64,
}

#[cfg(feature = "serde")]
fn default_weight() -> f64 {
    1.0
}

impl Point {
    /// Create a point with the default weight of 1
    pub fn new(id: u64, latitude: f64, longitude: f64) -> Self {
        Self {
            id: PointId(id),
            latitude,
            longitude,
            weight: 1.0,
        }
    }

    /// Set the weight of this point
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Check that the point can be clustered
    pub fn validate(&self) -> Result<(), IngestionError> {
        let id = self.id;
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(IngestionError::NonFiniteCoordinate { id });
        }
        if !utils::is_valid_wgs84(self.latitude, self.longitude) {
            return Err(IngestionError::OutOfRange {
                id,
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(IngestionError::InvalidWeight {
                id,
                weight: self.weight,
            });
        }
        Ok(())
    }
}

/// Reason a point was rejected at ingestion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestionError {
    #[error("point {id} has a non-finite coordinate")]
    NonFiniteCoordinate { id: PointId },

    #[error("point {id} is out of range ({latitude}, {longitude})")]
    OutOfRange {
        id: PointId,
        latitude: f64,
        longitude: f64,
    },

    #[error("point {id} has an invalid weight {weight}")]
    InvalidWeight { id: PointId, weight: f64 },

    #[error("point {id} appears more than once in the batch")]
    DuplicateId { id: PointId },
}

/// Per-reason counts for one ingested batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IngestReport {
    pub accepted: usize,
    pub non_finite: usize,
    pub out_of_range: usize,
    pub invalid_weight: usize,
    pub duplicate: usize,
}

impl IngestReport {
    /// Total number of points dropped from the batch
    pub fn dropped(&self) -> usize {
        self.non_finite + self.out_of_range + self.invalid_weight + self.duplicate
    }

    fn record(&mut self, error: &IngestionError) {
        match error {
            IngestionError::NonFiniteCoordinate { .. } => self.non_finite += 1,
            IngestionError::OutOfRange { .. } => self.out_of_range += 1,
            IngestionError::InvalidWeight { .. } => self.invalid_weight += 1,
            IngestionError::DuplicateId { .. } => self.duplicate += 1,
        }
    }
}

/// Result of [`ingest`]: accepted points sorted by id, plus the drop counts
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub points: Vec<Point>,
    pub report: IngestReport,
}

/// Validate a batch of points
///
/// Malformed points are dropped and counted. When an id appears more than once, the
/// copy with the smallest `(latitude, longitude, weight)` is kept and the others are
/// counted as duplicates. The accepted points are returned sorted by id, which makes
/// everything downstream independent of the input order.
pub fn ingest(raw: impl IntoIterator<Item = Point>) -> Ingested {
    #[cfg(feature = "profiling")]
    profiling::scope!("point::ingest");

    let raw: Vec<Point> = raw.into_iter().collect();
    let checked: Vec<Result<Point, IngestionError>> = raw
        .into_par_iter()
        .map(|point| point.validate().map(|()| point))
        .collect();

    let mut report = IngestReport::default();
    let mut by_id: FxHashMap<PointId, Point> = FxHashMap::default();
    by_id.reserve(checked.len());

    for result in checked {
        let point = match result {
            Ok(point) => point,
            Err(error) => {
                tracing::debug!("Dropping point: {error}");
                report.record(&error);
                continue;
            }
        };
        match by_id.entry(point.id) {
            Entry::Vacant(entry) => {
                entry.insert(point);
            }
            Entry::Occupied(mut entry) => {
                if precedence(&point, entry.get()).is_lt() {
                    entry.insert(point);
                }
                let error = IngestionError::DuplicateId { id: point.id };
                tracing::debug!("Dropping point: {error}");
                report.record(&error);
            }
        }
    }

    let mut points: Vec<Point> = by_id.into_values().collect();
    points.par_sort_unstable_by_key(|p| p.id);
    report.accepted = points.len();

    if report.dropped() > 0 {
        tracing::info!(
            "Ingested {} points, dropped {} malformed",
            report.accepted,
            report.dropped()
        );
    }

    Ingested { points, report }
}

/// Order between two copies of the same id; the smaller one is kept
fn precedence(a: &Point, b: &Point) -> Ordering {
    a.latitude
        .total_cmp(&b.latitude)
        .then_with(|| a.longitude.total_cmp(&b.longitude))
        .then_with(|| a.weight.total_cmp(&b.weight))
}
