use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace};

use crate::error::Result;
use crate::source::FeedEvent;
use crate::status;
use crate::types::{Alert, FleetStats, GeoFence, Vehicle};

/// Alerts kept, newest first. Older ones are dropped.
pub const ALERT_CAPACITY: usize = 100;

#[derive(Debug, Default)]
pub struct VehicleStore {
    vehicles: BTreeMap<String, Vehicle>,
    connected: bool,
}

impl VehicleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the collection from the start-up snapshot. A live update
    /// that already arrived for the same vehicle is kept if it is newer.
    pub fn load_snapshot(&mut self, snapshot: Vec<Vehicle>) {
        info!(count = snapshot.len(), "loading vehicle snapshot");
        for vehicle in snapshot {
            let stale = self
                .vehicles
                .get(&vehicle.vehicle_id)
                .is_some_and(|current| current.timestamp > vehicle.timestamp);
            if !stale {
                self.vehicles.insert(vehicle.vehicle_id.clone(), vehicle);
            }
        }
    }

    pub fn upsert(&mut self, vehicle: Vehicle) {
        trace!(
            vehicle_id = %vehicle.vehicle_id,
            lat = vehicle.lat,
            lng = vehicle.lng,
            speed_kph = vehicle.speed_kph,
            "vehicle update"
        );
        self.vehicles.insert(vehicle.vehicle_id.clone(), vehicle);
    }

    pub fn apply(&mut self, event: FeedEvent<Vehicle>) {
        match event {
            FeedEvent::Open => {
                info!("vehicle channel connected");
                self.connected = true;
            }
            FeedEvent::Item(vehicle) => self.upsert(vehicle),
            FeedEvent::Keepalive => trace!("vehicle channel heartbeat"),
            FeedEvent::Error(reason) => {
                error!(%reason, "vehicle channel error");
                self.connected = false;
            }
        }
    }

    /// Current vehicles ordered by id, each with its status freshly derived.
    pub fn vehicles(&self, now: DateTime<Utc>) -> Vec<Vehicle> {
        self.vehicles.values().map(|v| with_status(v, now)).collect()
    }

    pub fn get(&self, vehicle_id: &str, now: DateTime<Utc>) -> Option<Vehicle> {
        self.vehicles.get(vehicle_id).map(|v| with_status(v, now))
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

fn with_status(vehicle: &Vehicle, now: DateTime<Utc>) -> Vehicle {
    Vehicle {
        status: Some(status::classify(vehicle.speed_kph, vehicle.timestamp, now)),
        ..vehicle.clone()
    }
}

#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: VecDeque<Alert>,
    connected: bool,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, alert: Alert) {
        debug!(id = %alert.id, vehicle_id = %alert.vehicle_id, alert_type = ?alert.alert_type, "alert received");
        self.alerts.push_front(alert);
        self.alerts.truncate(ALERT_CAPACITY);
    }

    pub fn apply(&mut self, event: FeedEvent<Alert>) {
        match event {
            FeedEvent::Open => {
                info!("alert channel connected");
                self.connected = true;
            }
            FeedEvent::Item(alert) => self.push(alert),
            FeedEvent::Keepalive => trace!("alert channel heartbeat"),
            FeedEvent::Error(reason) => {
                error!(%reason, "alert channel error");
                self.connected = false;
            }
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Alert> {
        self.alerts.front()
    }

    pub fn by_vehicle(&self, vehicle_id: &str) -> Vec<Alert> {
        self.alerts.iter().filter(|a| a.vehicle_id == vehicle_id).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, Default)]
pub struct StatsStore {
    current: Option<FleetStats>,
}

impl StatsStore {
    pub fn update(&mut self, result: Result<FleetStats>) {
        match result {
            Ok(stats) => self.current = Some(stats),
            // keep the previous value; the next poll tries again
            Err(err) => error!(error = %err, "failed to fetch stats"),
        }
    }

    pub fn current(&self) -> Option<FleetStats> {
        self.current
    }
}

/// Load state of the one-shot geofence fetch.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum GeofenceStore {
    #[default]
    Loading,
    Loaded(Vec<GeoFence>),
    Failed(String),
}

impl GeofenceStore {
    /// Records the outcome of the fetch. Only the first outcome counts.
    pub fn finish(&mut self, result: Result<Vec<GeoFence>>) {
        if !self.is_loading() {
            return;
        }
        *self = match result {
            Ok(fences) => Self::Loaded(fences),
            Err(err) => {
                error!(error = %err, "failed to load geofences");
                Self::Failed(err.to_string())
            }
        };
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Loaded zones; empty while loading or after a failure.
    pub fn geofences(&self) -> &[GeoFence] {
        match self {
            Self::Loaded(fences) => fences,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}
