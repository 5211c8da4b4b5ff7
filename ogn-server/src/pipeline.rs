//! Tracker task: the single writer of the shared aircraft table.
//!
//! Consumes decoded reports from the report broadcaster, applies them to the
//! tracker at the current tokio time, sleeps until the next scheduled expiry
//! and publishes every resulting `TrackEvent`.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ogn_core::tracker::{TrackEvent, Tracker};
use ogn_core::PositionReport;

use crate::broadcast::{Broadcaster, Subscription};

/// Seconds since a fixed origin, on tokio's clock (pausable in tests).
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// The instant `secs` after the origin, if representable.
    pub fn instant_at(&self, secs: f64) -> Option<Instant> {
        let offset = Duration::try_from_secs_f64(secs.max(0.0)).ok()?;
        self.origin.checked_add(offset)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

pub struct TrackerTask {
    tracker: Arc<RwLock<Tracker>>,
    reports: Subscription<PositionReport>,
    events: Broadcaster<TrackEvent>,
    clock: Clock,
}

impl TrackerTask {
    pub fn new(
        tracker: Arc<RwLock<Tracker>>,
        reports: Subscription<PositionReport>,
        events: Broadcaster<TrackEvent>,
    ) -> Self {
        TrackerTask {
            tracker,
            reports,
            events,
            clock: Clock::new(),
        }
    }

    /// Run until `shutdown` is cancelled or the report source goes away.
    /// On exit the table is cleared, dropping every pending expiry.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(ttl_secs = self.read_ttl(), "Tracker task started");

        loop {
            let next = self.tracker.write().unwrap().next_expiry();
            let wake = next.and_then(|t| self.clock.instant_at(t));

            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.reports.recv() => match report {
                    Some(report) => self.apply(report),
                    None => break,
                },
                _ = sleep_until_or_forever(wake) => {
                    // Woken for `next`; never pass a clock reading that
                    // rounded to just before it.
                    let now = next.map_or(self.clock.now(), |t| self.clock.now().max(t));
                    self.expire(now);
                }
            }
        }

        let mut tracker = self.tracker.write().unwrap();
        let live = tracker.len();
        tracker.clear();
        tracing::info!(
            dropped = live,
            reports = tracker.reports,
            removals = tracker.removals,
            "Tracker task stopped"
        );
    }

    fn apply(&self, report: PositionReport) {
        let now = self.clock.now();
        let event = self.tracker.write().unwrap().on_report(report, now);
        if let Some(event) = event {
            tracing::trace!(id = event.id(), "Aircraft updated");
            self.events.publish(event);
        }
    }

    fn expire(&self, now: f64) {
        let events = self.tracker.write().unwrap().expire(now);
        for event in events {
            tracing::debug!(id = event.id(), "Aircraft expired");
            self.events.publish(event);
        }
    }

    fn read_ttl(&self) -> f64 {
        self.tracker.read().unwrap().ttl()
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ogn_core::config::TrackerConfig;

    struct Harness {
        reports: Broadcaster<PositionReport>,
        events: Subscription<TrackEvent>,
        tracker: Arc<RwLock<Tracker>>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let tracker = Arc::new(RwLock::new(Tracker::new(&TrackerConfig::default())));
        let reports = Broadcaster::new(64);
        let event_hub = Broadcaster::new(64);
        let events = event_hub.subscribe();

        let task = TrackerTask::new(Arc::clone(&tracker), reports.subscribe(), event_hub);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(task.run(shutdown.clone()));

        Harness {
            reports,
            events,
            tracker,
            shutdown,
            task: handle,
        }
    }

    fn report(name: &str) -> PositionReport {
        PositionReport::new(name, 46.5, 8.1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_produces_upsert() {
        let mut h = start();
        h.reports.publish(report("FLR1"));

        match h.events.recv().await.unwrap() {
            TrackEvent::Upsert(ac) => assert_eq!(ac.id, "FLR1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.tracker.read().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_ttl() {
        let mut h = start();
        let started = Instant::now();
        h.reports.publish(report("FLR1"));
        h.events.recv().await.unwrap();

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            TrackEvent::Remove {
                id: "FLR1".into()
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(61));
        assert!(h.tracker.read().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_before_ttl_keeps_entry() {
        let mut h = start();
        let started = Instant::now();
        h.reports.publish(report("FLR1"));
        h.events.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(59_900)).await;
        h.reports.publish(report("FLR1"));
        h.events.recv().await.unwrap();

        // The original deadline passes without a removal.
        let quiet = tokio::time::timeout(Duration::from_secs(30), h.events.recv()).await;
        assert!(quiet.is_err());
        assert_eq!(h.tracker.read().unwrap().len(), 1);

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.id(), "FLR1");
        assert!(matches!(event, TrackEvent::Remove { .. }));
        assert!(started.elapsed() >= Duration::from_millis(119_900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_report_ignored() {
        let mut h = start();
        h.reports.publish(PositionReport::new("FLR0", 0.0, 8.1));
        h.reports.publish(report("FLR1"));

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.id(), "FLR1");
        assert_eq!(h.tracker.read().unwrap().ignored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_table() {
        let mut h = start();
        h.reports.publish(report("FLR1"));
        h.reports.publish(report("FLR2"));
        h.events.recv().await.unwrap();
        h.events.recv().await.unwrap();

        h.shutdown.cancel();
        h.task.await.unwrap();

        let mut tracker = h.tracker.write().unwrap();
        assert!(tracker.is_empty());
        assert_eq!(tracker.next_expiry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_in_report_order() {
        let mut h = start();
        for name in ["A", "B", "C"] {
            h.reports.publish(report(name));
        }
        for name in ["A", "B", "C"] {
            assert_eq!(h.events.recv().await.unwrap().id(), name);
        }
    }

    #[test]
    fn test_clock_instant_at() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let clock = Clock::new();
            let at = clock.instant_at(2.5).unwrap();
            assert_eq!(at - clock.origin, Duration::from_millis(2500));
            assert_eq!(clock.instant_at(-1.0), Some(clock.origin));
            assert!(clock.instant_at(f64::INFINITY).is_none());
        });
    }
}
