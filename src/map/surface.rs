use std::collections::BTreeMap;
use std::io::Write;

use crossterm::style::{style, Stylize};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// City center used before any marker has been placed.
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    lat: 52.3676,
    lng: 4.9041,
};

/// Zoom level of a freshly created map.
pub const DEFAULT_ZOOM: u8 = 13;

/// Close-in zoom used when a batch produced a single address.
pub const CLOSE_IN_ZOOM: u8 = 15;

const MAX_ZOOM: u8 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Axis-aligned lat/lng box grown one coordinate at a time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    corners: Option<(Coordinate, Coordinate)>,
}

impl Bounds {
    pub fn extend(&mut self, point: Coordinate) {
        self.corners = Some(match self.corners {
            None => (point, point),
            Some((sw, ne)) => (
                Coordinate {
                    lat: sw.lat.min(point.lat),
                    lng: sw.lng.min(point.lng),
                },
                Coordinate {
                    lat: ne.lat.max(point.lat),
                    lng: ne.lng.max(point.lng),
                },
            ),
        });
    }

    pub fn center(&self) -> Option<Coordinate> {
        self.corners.map(|(sw, ne)| Coordinate {
            lat: (sw.lat + ne.lat) / 2.0,
            lng: (sw.lng + ne.lng) / 2.0,
        })
    }

    /// Largest zoom level at which the whole box still fits a 256px tile.
    pub fn fitting_zoom(&self) -> Option<u8> {
        let (sw, ne) = self.corners?;
        let span = (ne.lng - sw.lng).max(ne.lat - sw.lat);
        if span <= f64::EPSILON {
            return Some(MAX_ZOOM);
        }
        let zoom = (360.0 / span).log2().floor();
        Some(zoom.clamp(0.0, f64::from(MAX_ZOOM)) as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: Coordinate,
    pub zoom: u8,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

/// Handle returned by a surface for a marker it has attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerHandle(pub u64);

/// A marker placed for one resolved address.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub address: String,
    pub position: Coordinate,
    pub handle: MarkerHandle,
}

/// Something markers can be drawn on.
pub trait MapSurface {
    fn attach_marker(&mut self, title: &str, position: Coordinate) -> MarkerHandle;
    fn detach_marker(&mut self, handle: MarkerHandle);
    fn set_viewport(&mut self, viewport: Viewport);
}

/// Map surface that prints marker drops and viewport changes to a terminal.
pub struct TerminalMap {
    output: Box<dyn Write + Send>,
    markers: BTreeMap<MarkerHandle, (String, Coordinate)>,
    next_handle: u64,
    viewport: Viewport,
}

impl TerminalMap {
    pub fn new(output: Box<dyn Write + Send>) -> Self {
        Self {
            output,
            markers: BTreeMap::new(),
            next_handle: 0,
            viewport: Viewport::default(),
        }
    }

    #[cfg(test)]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    #[cfg(test)]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn print(&mut self, line: String) {
        if let Err(e) = writeln!(self.output, "{}", line) {
            warn!("Failed to draw map update: {}", e);
        }
    }
}

impl MapSurface for TerminalMap {
    fn attach_marker(&mut self, title: &str, position: Coordinate) -> MarkerHandle {
        self.next_handle += 1;
        let handle = MarkerHandle(self.next_handle);
        self.markers.insert(handle, (title.to_string(), position));
        self.print(format!(
            "  {} {} ({:.5}, {:.5})",
            style("📍").cyan(),
            style(title).bold(),
            position.lat,
            position.lng
        ));
        handle
    }

    fn detach_marker(&mut self, handle: MarkerHandle) {
        self.markers.remove(&handle);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        let line = format!(
            "  map: {} marker(s), centered on ({:.5}, {:.5}) at zoom {}",
            self.markers.len(),
            viewport.center.lat,
            viewport.center.lng,
            viewport.zoom
        );
        self.print(style(line).dark_grey().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_extend_and_center() {
        let mut bounds = Bounds::default();
        assert!(bounds.center().is_none());
        assert_eq!(bounds.fitting_zoom(), None);

        bounds.extend(Coordinate { lat: 52.36, lng: 4.88 });
        bounds.extend(Coordinate { lat: 52.38, lng: 4.90 });
        let center = bounds.center().unwrap();
        assert!((center.lat - 52.37).abs() < 1e-9);
        assert!((center.lng - 4.89).abs() < 1e-9);
    }

    #[test]
    fn test_fitting_zoom() {
        let mut bounds = Bounds::default();
        bounds.extend(DEFAULT_CENTER);
        assert_eq!(bounds.fitting_zoom(), Some(MAX_ZOOM));

        bounds.extend(Coordinate { lat: 52.3676, lng: 4.9041 + 0.04 });
        // 360 / 0.04 = 9000, log2 ~ 13.1
        assert_eq!(bounds.fitting_zoom(), Some(13));
    }

    #[test]
    fn test_terminal_map_tracks_markers() {
        let mut map = TerminalMap::new(Box::new(std::io::sink()));
        let a = map.attach_marker("Singel 12", DEFAULT_CENTER);
        let b = map.attach_marker("Damstraat 5", DEFAULT_CENTER);
        assert_ne!(a, b);
        assert_eq!(map.marker_count(), 2);
        map.detach_marker(a);
        assert_eq!(map.marker_count(), 1);
        map.set_viewport(Viewport { center: DEFAULT_CENTER, zoom: CLOSE_IN_ZOOM });
        assert_eq!(map.viewport().zoom, CLOSE_IN_ZOOM);
    }
}
