//! Bus-stop proximity alert.
//!
//! Region monitoring itself belongs to the platform. This module turns its
//! state events into a local notification on entry.

use std::sync::{Mutex, PoisonError};

pub const STOP_REGION_ID: &str = "stop-geo";
pub const DEFAULT_STOP_RADIUS_M: f64 = 10.0;

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle (haversine) distance in metres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CircularRegion {
    pub id: String,
    pub center: Coordinate,
    pub radius_m: f64,
    pub notify_on_entry: bool,
    pub notify_on_exit: bool,
}

impl CircularRegion {
    /// Entry-only region around a departure stop.
    pub fn stop(center: Coordinate, radius_m: f64) -> Self {
        Self {
            id: STOP_REGION_ID.to_string(),
            center,
            radius_m,
            notify_on_entry: true,
            notify_on_exit: false,
        }
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_to(point) <= self.radius_m
    }
}

/// Region state reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionEvent {
    Enter,
    Exit,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

pub trait NotificationSink: Send {
    fn post(&mut self, notification: Notification);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn post(&mut self, notification: Notification) {
        log::info!("notification: {} - {}", notification.title, notification.body);
    }
}

pub struct StopAlert<S: NotificationSink> {
    region: CircularRegion,
    sink: Mutex<S>,
}

impl<S: NotificationSink> StopAlert<S> {
    pub fn new(region: CircularRegion, sink: S) -> Self {
        log::info!(
            "monitoring region {} center=({:.6}, {:.6}) r={:.1}m",
            region.id,
            region.center.latitude,
            region.center.longitude,
            region.radius_m
        );
        Self {
            region,
            sink: Mutex::new(sink),
        }
    }

    pub fn region(&self) -> &CircularRegion {
        &self.region
    }

    /// React to a state event. `here`, when known, is only used for logging.
    /// Returns whether a notification was posted.
    pub fn handle(&self, event: RegionEvent, here: Option<Coordinate>) -> bool {
        if let Some(here) = here {
            log::debug!(
                "region {} center=({:.6}, {:.6}) r={:.1}m | current=({:.6}, {:.6}) dist={:.1}m",
                self.region.id,
                self.region.center.latitude,
                self.region.center.longitude,
                self.region.radius_m,
                here.latitude,
                here.longitude,
                self.region.center.distance_to(&here)
            );
        }
        match event {
            RegionEvent::Enter if self.region.notify_on_entry => {
                log::info!("entered region {}", self.region.id);
                self.sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .post(arrival_notification(self.region.radius_m));
                true
            }
            RegionEvent::Enter => false,
            RegionEvent::Exit => {
                log::info!("outside region {}", self.region.id);
                false
            }
            RegionEvent::Unknown => {
                log::info!("region {} state temporarily unknown", self.region.id);
                false
            }
        }
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.sink.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub fn arrival_notification(radius_m: f64) -> Notification {
    Notification {
        title: "Arrived at departure stop".to_string(),
        body: format!("Entered the {} m radius around the stop.", radius_m),
    }
}
