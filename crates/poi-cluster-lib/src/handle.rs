//! Shared, atomically replaceable reference to the current spatial index

use crate::index::SpatialIndex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Cell holding the current [`SpatialIndex`]
///
/// Indexes are never mutated in place: a rebuild produces a new index that replaces the
/// old one as a whole. Readers take an `Arc` snapshot and keep using it even if a newer
/// index is installed meanwhile, so a query always sees exactly one index.
///
/// Cloning the handle shares the cell.
#[derive(Debug, Clone, Default)]
pub struct IndexHandle {
    current: Arc<RwLock<Option<Arc<SpatialIndex>>>>,
    generation: Arc<AtomicU64>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index installed most recently, or `None` before the first build completes
    pub fn snapshot(&self) -> Option<Arc<SpatialIndex>> {
        // The guarded value is only ever swapped whole, so a poisoned lock still holds a
        // complete index
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new index, returning its generation number
    pub fn replace(&self, index: impl Into<Arc<SpatialIndex>>) -> u64 {
        let index = index.into();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(index);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(current);

        tracing::debug!("Installed spatial index generation {generation}");
        generation
    }

    /// Drop the current index; queries return nothing until the next install
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of indexes installed so far
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexParams;
    use crate::point::Point;
    use std::thread;

    #[test]
    fn test_empty_handle() {
        let handle = IndexHandle::new();
        assert!(handle.snapshot().is_none());
        assert!(!handle.is_ready());
        assert_eq!(handle.generation(), 0);
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let handle = IndexHandle::new();
        let first = SpatialIndex::build(vec![Point::new(1, 0.0, 0.0)], IndexParams::default());
        assert_eq!(handle.replace(first), 1);

        let old = handle.snapshot().unwrap();
        let second = SpatialIndex::build(
            vec![Point::new(1, 0.0, 0.0), Point::new(2, 5.0, 5.0)],
            IndexParams::default(),
        );
        assert_eq!(handle.replace(second), 2);

        assert_eq!(old.point_count(), 1);
        assert_eq!(handle.snapshot().unwrap().point_count(), 2);

        handle.clear();
        assert!(!handle.is_ready());
        assert_eq!(handle.generation(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_whole_indexes() {
        let handle = IndexHandle::new();
        let writer = {
            let handle = handle.clone();
            thread::spawn(move || {
                for n in 1..=20u64 {
                    let points = (0..n).map(|i| Point::new(i, i as f64 * 0.1, 0.0));
                    handle.replace(SpatialIndex::build(points, IndexParams::default()));
                }
            })
        };
        let reader = {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(index) = handle.snapshot() {
                        // Every level of one index covers the same points
                        let top: usize = index.features_at(0).map(|f| f.point_count).sum();
                        assert_eq!(top, index.point_count());
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(handle.generation(), 20);
    }
}
