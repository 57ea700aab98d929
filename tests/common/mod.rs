//! Common test utilities shared across integration tests.

use chrono::{DateTime, TimeZone, Utc};
use cronlet::testing::{ManualClock, RecordingHandler};
use cronlet::{EventBus, InMemoryStore, Reconciler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A wall-clock time on 2024-01-15 (UTC).
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, second)
        .unwrap()
}

/// An in-memory store and a reconciler sharing one manual clock.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<EventBus>,
    pub recorder: Arc<RecordingHandler>,
    pub reconciler: Reconciler<InMemoryStore>,
}

impl Harness {
    /// Start the clock at `now`. Objects created before the clock moves get
    /// `now` as their creation timestamp.
    pub async fn new(now: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let recorder = Arc::new(RecordingHandler::new());
        let events = Arc::new(EventBus::new());
        events.register(recorder.clone()).await;
        let reconciler = Reconciler::new(Arc::clone(&store))
            .with_clock(clock.clone())
            .with_event_bus(Arc::clone(&events));
        Self {
            store,
            clock,
            events,
            recorder,
            reconciler,
        }
    }
}

/// Poll `condition` every 10ms until it holds.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
