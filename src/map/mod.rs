//! Incremental geocoding map.
//!
//! [`IncrementalMap`] holds the bookkeeping: which addresses were already
//! handed to the geocoder, which batch is in flight, the markers placed so far
//! and the accumulated bounds. It never performs I/O itself; [`MapDriver`]
//! runs the lookups and the watchdog and feeds their outcomes back in.

pub mod driver;
pub mod geocoder;
pub mod surface;

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

pub use driver::{MapDriver, MapEvent};
pub use geocoder::{search_query, GeocodeError, Geocoder, GoogleGeocoder};
pub use surface::{
    Bounds, Coordinate, MapSurface, Marker, TerminalMap, Viewport, CLOSE_IN_ZOOM,
};

pub type BatchId = u64;

/// Newly seen addresses handed to the geocoder together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    pub addresses: Vec<String>,
}

#[derive(Debug, Default)]
struct BatchProgress {
    expected: usize,
    settled: usize,
    last_success: Option<Coordinate>,
}

pub struct IncrementalMap<S> {
    surface: S,
    processed: HashSet<String>,
    markers: Vec<Marker>,
    bounds: Bounds,
    in_flight: Option<BatchId>,
    batches: HashMap<BatchId, BatchProgress>,
    deferred: Option<Vec<String>>,
    next_batch: BatchId,
    torn_down: bool,
}

impl<S: MapSurface> IncrementalMap<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            processed: HashSet::new(),
            markers: Vec::new(),
            bounds: Bounds::default(),
            in_flight: None,
            batches: HashMap::new(),
            deferred: None,
            next_batch: 0,
            torn_down: false,
        }
    }

    /// Feed the current address list.
    ///
    /// Returns the batch to resolve when the list holds addresses this map has
    /// never processed and nothing is in flight. While a batch is in flight the
    /// list is remembered and evaluated again once that batch is released.
    pub fn update(&mut self, addresses: &[String]) -> Option<Batch> {
        if self.torn_down {
            return None;
        }

        let mut seen = HashSet::new();
        let fresh: Vec<String> = addresses
            .iter()
            .filter(|a| !self.processed.contains(*a) && seen.insert(a.as_str()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return None;
        }

        if let Some(current) = self.in_flight {
            debug!(
                "Batch {} still in flight, deferring {} new address(es)",
                current,
                fresh.len()
            );
            self.deferred = Some(addresses.to_vec());
            return None;
        }

        self.next_batch += 1;
        let id = self.next_batch;
        for address in &fresh {
            self.processed.insert(address.clone());
        }
        self.in_flight = Some(id);
        self.batches.insert(
            id,
            BatchProgress {
                expected: fresh.len(),
                ..BatchProgress::default()
            },
        );

        info!("Processing new addresses: {:?}", fresh);
        Some(Batch {
            id,
            addresses: fresh,
        })
    }

    /// Record the outcome of one lookup.
    ///
    /// May return a follow-up batch when this result released the in-flight
    /// flag and a deferred update holds new addresses.
    pub fn on_resolved(
        &mut self,
        batch: BatchId,
        address: &str,
        result: Result<Coordinate, GeocodeError>,
    ) -> Option<Batch> {
        if self.torn_down {
            return None;
        }
        let Some(progress) = self.batches.get_mut(&batch) else {
            debug!("Ignoring result for unknown batch {}", batch);
            return None;
        };

        match result {
            Ok(position) => {
                debug!("Geocoding successful for: {}", address);
                let handle = self.surface.attach_marker(address, position);
                self.markers.push(Marker {
                    address: address.to_string(),
                    position,
                    handle,
                });
                self.bounds.extend(position);
                progress.last_success = Some(position);
            }
            Err(e) => warn!("Geocoding failed for: {}: {}", address, e),
        }

        progress.settled += 1;
        if progress.settled < progress.expected {
            return None;
        }

        let progress = self.batches.remove(&batch)?;
        self.refit(&progress);

        if self.in_flight == Some(batch) {
            self.in_flight = None;
            self.resume_deferred()
        } else {
            debug!("Batch {} completed after its watchdog fired", batch);
            None
        }
    }

    /// Release the in-flight flag if `batch` still holds it.
    pub fn on_watchdog(&mut self, batch: BatchId) -> Option<Batch> {
        if self.torn_down || self.in_flight != Some(batch) {
            return None;
        }
        warn!("Geocoding timeout reached for batch {}, resetting processing state", batch);
        self.in_flight = None;
        self.resume_deferred()
    }

    /// Detach every marker and forget all processed addresses.
    pub fn teardown(&mut self) {
        for marker in self.markers.drain(..) {
            self.surface.detach_marker(marker.handle);
        }
        self.processed.clear();
        self.batches.clear();
        self.deferred = None;
        self.in_flight = None;
        self.bounds = Bounds::default();
        self.torn_down = true;
        debug!("Map torn down");
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    #[cfg(test)]
    pub fn is_processed(&self, address: &str) -> bool {
        self.processed.contains(address)
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    fn refit(&mut self, progress: &BatchProgress) {
        let Some(last) = progress.last_success else {
            return;
        };

        let viewport = if progress.expected == 1 {
            Viewport {
                center: last,
                zoom: CLOSE_IN_ZOOM,
            }
        } else {
            match (self.bounds.center(), self.bounds.fitting_zoom()) {
                (Some(center), Some(zoom)) => Viewport { center, zoom },
                _ => return,
            }
        };
        self.surface.set_viewport(viewport);
    }

    fn resume_deferred(&mut self) -> Option<Batch> {
        let addresses = self.deferred.take()?;
        self.update(&addresses)
    }
}
