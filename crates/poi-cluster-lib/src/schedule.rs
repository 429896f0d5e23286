//! Frame throttling for viewport queries
//!
//! At most one query is dispatched per frame interval. A viewport submitted while
//! another is still pending replaces it, and results computed for an older ticket are
//! recognised as stale and discarded by the caller.

use crate::query::Viewport;
use instant::Instant;
use std::time::Duration;

/// Identifies one submitted viewport; later tickets compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Latest-wins, frame-throttled viewport queue
#[derive(Debug, Clone)]
pub struct ViewportScheduler {
    interval: Duration,
    issued: u64,
    pending: Option<(Ticket, Viewport)>,
    last_dispatch: Option<Instant>,
    superseded: u64,
}

impl ViewportScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            issued: 0,
            pending: None,
            last_dispatch: None,
            superseded: 0,
        }
    }

    /// Queue a viewport, superseding any viewport not yet dispatched
    pub fn submit(&mut self, viewport: Viewport) -> Ticket {
        self.issued += 1;
        let ticket = Ticket(self.issued);
        if let Some((old, _)) = self.pending.replace((ticket, viewport)) {
            self.superseded += 1;
            tracing::trace!("Viewport {:?} superseded by {:?}", old, ticket);
        }
        ticket
    }

    /// Take the pending viewport if a frame interval has passed since the last dispatch
    pub fn poll(&mut self, now: Instant) -> Option<(Ticket, Viewport)> {
        if let Some(last) = self.last_dispatch
            && now.saturating_duration_since(last) < self.interval
        {
            return None;
        }
        let pending = self.pending.take()?;
        self.last_dispatch = Some(now);
        Some(pending)
    }

    /// Whether results for `ticket` are still wanted
    #[inline]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.issued
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of viewports replaced before they were dispatched
    #[inline]
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Time until the next dispatch is allowed
    pub fn wait_time(&self, now: Instant) -> Duration {
        self.last_dispatch.map_or(Duration::ZERO, |last| {
            self.interval
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::BoundingBox;

    fn viewport(zoom: u8) -> Viewport {
        Viewport::new(BoundingBox::new(-1.0, -1.0, 1.0, 1.0), zoom)
    }

    #[test]
    fn test_latest_viewport_wins() {
        let mut scheduler = ViewportScheduler::new(Duration::from_millis(16));
        let first = scheduler.submit(viewport(3));
        let second = scheduler.submit(viewport(4));
        assert!(first < second);
        assert!(!scheduler.is_current(first));
        assert!(scheduler.is_current(second));
        assert_eq!(scheduler.superseded(), 1);

        let (ticket, dispatched) = scheduler.poll(Instant::now()).unwrap();
        assert_eq!(ticket, second);
        assert_eq!(dispatched.zoom, 4);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn test_throttled_to_one_per_interval() {
        let mut scheduler = ViewportScheduler::new(Duration::from_millis(16));
        let start = Instant::now();

        scheduler.submit(viewport(1));
        assert!(scheduler.poll(start).is_some());

        scheduler.submit(viewport(2));
        assert!(scheduler.poll(start + Duration::from_millis(5)).is_none());
        assert_eq!(
            scheduler.wait_time(start + Duration::from_millis(5)),
            Duration::from_millis(11)
        );
        assert!(scheduler.has_pending());

        let (_, dispatched) = scheduler.poll(start + Duration::from_millis(16)).unwrap();
        assert_eq!(dispatched.zoom, 2);
    }

    #[test]
    fn test_stale_result_detected_after_dispatch() {
        let mut scheduler = ViewportScheduler::new(Duration::ZERO);
        scheduler.submit(viewport(1));
        let (in_flight, _) = scheduler.poll(Instant::now()).unwrap();
        assert!(scheduler.is_current(in_flight));

        scheduler.submit(viewport(2));
        assert!(!scheduler.is_current(in_flight));
        // Already dispatched, so nothing was superseded in the queue
        assert_eq!(scheduler.superseded(), 0);
    }

    #[test]
    fn test_poll_without_submission() {
        let mut scheduler = ViewportScheduler::new(Duration::from_millis(16));
        assert!(scheduler.poll(Instant::now()).is_none());
        assert_eq!(scheduler.wait_time(Instant::now()), Duration::ZERO);
    }
}
