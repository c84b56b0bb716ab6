use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::geocoder::{search_query, GeocodeError, Geocoder};
use super::surface::{Coordinate, MapSurface};
use super::{Batch, BatchId, IncrementalMap};

/// How long a batch may hold the in-flight flag.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(10);

/// Outcome reported back to the event loop by a lookup or watchdog task.
#[derive(Debug)]
pub enum MapEvent {
    Resolved {
        batch: BatchId,
        address: String,
        result: Result<Coordinate, GeocodeError>,
    },
    WatchdogExpired {
        batch: BatchId,
    },
}

/// Runs geocode lookups and batch watchdogs for an [`IncrementalMap`].
///
/// Lookups run as tokio tasks and report through a channel; every state change
/// happens in [`MapDriver::apply`] on the task that owns the driver.
pub struct MapDriver<S> {
    map: IncrementalMap<S>,
    geocoder: Arc<dyn Geocoder>,
    watchdog: Duration,
    events_tx: mpsc::UnboundedSender<MapEvent>,
    events_rx: mpsc::UnboundedReceiver<MapEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: MapSurface> MapDriver<S> {
    pub fn new(surface: S, geocoder: Arc<dyn Geocoder>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            map: IncrementalMap::new(surface),
            geocoder,
            watchdog: DEFAULT_WATCHDOG,
            events_tx,
            events_rx,
            tasks: Vec::new(),
        }
    }

    pub fn map(&self) -> &IncrementalMap<S> {
        &self.map
    }

    /// Feed the latest address list, starting lookups for anything new.
    pub fn update(&mut self, addresses: &[String]) {
        if let Some(batch) = self.map.update(addresses) {
            self.dispatch(batch);
        }
    }

    /// Wait for the next lookup result or watchdog expiry.
    pub async fn next_event(&mut self) -> Option<MapEvent> {
        self.events_rx.recv().await
    }

    pub fn apply(&mut self, event: MapEvent) {
        let follow_up = match event {
            MapEvent::Resolved {
                batch,
                address,
                result,
            } => self.map.on_resolved(batch, &address, result),
            MapEvent::WatchdogExpired { batch } => self.map.on_watchdog(batch),
        };
        if let Some(batch) = follow_up {
            self.dispatch(batch);
        }
    }

    /// Process events until no batch holds the in-flight flag.
    pub async fn settle(&mut self) {
        while self.map.is_busy() {
            match self.events_rx.recv().await {
                Some(event) => self.apply(event),
                None => break,
            }
        }
    }

    /// Cancel outstanding lookups and the watchdog, then tear the map down.
    pub fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        while self.events_rx.try_recv().is_ok() {}
        self.map.teardown();
    }

    fn dispatch(&mut self, batch: Batch) {
        self.tasks.retain(|task| !task.is_finished());

        for address in batch.addresses {
            let geocoder = Arc::clone(&self.geocoder);
            let events = self.events_tx.clone();
            let id = batch.id;
            self.tasks.push(tokio::spawn(async move {
                let query = search_query(&address);
                debug!("Geocoding address: {}", query);
                let result = geocoder.geocode(&query).await;
                // The receiver is gone only once the driver was dropped.
                let _ = events.send(MapEvent::Resolved {
                    batch: id,
                    address,
                    result,
                });
            }));
        }

        let events = self.events_tx.clone();
        let watchdog = self.watchdog;
        let id = batch.id;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(watchdog).await;
            let _ = events.send(MapEvent::WatchdogExpired { batch: id });
        }));
    }
}

impl<S> Drop for MapDriver<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::map::tests::RecordingSurface;
    use crate::map::CLOSE_IN_ZOOM;

    /// Geocoder answering from a fixed table, optionally held back by a gate.
    #[derive(Default)]
    pub(crate) struct FakeGeocoder {
        known: HashMap<String, Coordinate>,
        queries: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeGeocoder {
        pub(crate) fn with(entries: &[(&str, f64, f64)]) -> Self {
            Self {
                known: entries
                    .iter()
                    .map(|(q, lat, lng)| (q.to_string(), Coordinate { lat: *lat, lng: *lng }))
                    .collect(),
                ..Self::default()
            }
        }

        pub(crate) fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, query: &str) -> Result<Coordinate, GeocodeError> {
            self.queries.lock().unwrap().push(query.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.known
                .get(query)
                .copied()
                .ok_or_else(|| GeocodeError::Status("ZERO_RESULTS".to_string()))
        }
    }

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolves_new_addresses_once() {
        let geocoder = Arc::new(FakeGeocoder::with(&[
            ("Singel 12, Amsterdam, Netherlands", 52.37, 4.89),
            ("Damstraat 5, Amsterdam, Netherlands", 52.372, 4.896),
        ]));
        let mut driver = MapDriver::new(RecordingSurface::default(), geocoder.clone());

        driver.update(&list(&["Singel 12"]));
        driver.settle().await;
        driver.update(&list(&["Singel 12", "Damstraat 5"]));
        driver.settle().await;
        driver.update(&list(&["Damstraat 5", "Singel 12"]));
        driver.settle().await;

        assert_eq!(
            geocoder.queries(),
            list(&[
                "Singel 12, Amsterdam, Netherlands",
                "Damstraat 5, Amsterdam, Netherlands"
            ])
        );
        assert_eq!(driver.map().markers().len(), 2);
    }

    #[tokio::test]
    async fn test_city_qualified_address_is_not_augmented() {
        let geocoder = Arc::new(FakeGeocoder::with(&[(
            "Westerstraat 35, 1015 MN Amsterdam",
            52.377,
            4.882,
        )]));
        let mut driver = MapDriver::new(RecordingSurface::default(), geocoder.clone());

        driver.update(&list(&["Westerstraat 35, 1015 MN Amsterdam"]));
        driver.settle().await;

        assert_eq!(geocoder.queries(), list(&["Westerstraat 35, 1015 MN Amsterdam"]));
        assert_eq!(driver.map().markers().len(), 1);
        assert_eq!(driver.map().surface().viewports[0].zoom, CLOSE_IN_ZOOM);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_unblocks_next_batch() {
        let gate = Arc::new(Notify::new());
        let geocoder = Arc::new(FakeGeocoder {
            gate: Some(gate.clone()),
            ..FakeGeocoder::with(&[
                ("Singel 12, Amsterdam, Netherlands", 52.37, 4.89),
                ("Damstraat 5, Amsterdam, Netherlands", 52.372, 4.896),
                ("Rozengracht 251, Amsterdam, Netherlands", 52.374, 4.88),
            ])
        });
        let mut driver = MapDriver::new(RecordingSurface::default(), geocoder.clone());

        driver.update(&list(&["Singel 12", "Damstraat 5", "Rozengracht 251"]));
        assert!(driver.map().is_busy());

        // Nothing resolves, so the first event is the watchdog.
        let event = driver.next_event().await.unwrap();
        assert!(matches!(event, MapEvent::WatchdogExpired { .. }));
        driver.apply(event);
        assert!(!driver.map().is_busy());

        driver.update(&list(&["Westerstraat 35"]));
        assert!(driver.map().is_busy());

        // The held-back lookups finish late and still produce markers, but
        // they do not release the newer batch.
        gate.notify_waiters();
        let mut late = 0;
        while late < 3 {
            let event = driver.next_event().await.unwrap();
            if matches!(event, MapEvent::Resolved { .. }) {
                late += 1;
            }
            driver.apply(event);
        }
        assert_eq!(driver.map().markers().len(), 3);
        assert!(driver.map().is_busy());
    }

    #[tokio::test]
    async fn test_teardown_cancels_pending_lookups() {
        let gate = Arc::new(Notify::new());
        let geocoder = Arc::new(FakeGeocoder {
            gate: Some(gate.clone()),
            ..FakeGeocoder::with(&[("Singel 12, Amsterdam, Netherlands", 52.37, 4.89)])
        });
        let mut driver = MapDriver::new(RecordingSurface::default(), geocoder);

        driver.update(&list(&["Singel 12"]));
        tokio::task::yield_now().await;
        driver.teardown();
        gate.notify_waiters();
        tokio::task::yield_now().await;

        assert!(!driver.map().is_busy());
        assert!(driver.map().markers().is_empty());
        assert!(!driver.map().is_processed("Singel 12"));
    }
}
