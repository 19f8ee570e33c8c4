use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::error::Result;
use crate::map::{MapRenderer, MapSurface};
use crate::source::FeedEvent;
use crate::store::{AlertStore, GeofenceStore, StatsStore, VehicleStore};
use crate::types::{Alert, FleetStats, GeoFence, LatLng, Vehicle};
use crate::view::{self, StatsBar, VehicleFilter, VehicleList};

pub struct Dashboard<S: MapSurface> {
    vehicles: VehicleStore,
    alerts: AlertStore,
    stats: StatsStore,
    geofences: GeofenceStore,
    map: MapRenderer<S>,
    highlighted: Option<String>,
    pub filter: VehicleFilter,
}

impl<S: MapSurface> Default for Dashboard<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MapSurface> Dashboard<S> {
    pub fn new() -> Self {
        Dashboard {
            vehicles: VehicleStore::new(),
            alerts: AlertStore::new(),
            stats: StatsStore::default(),
            geofences: GeofenceStore::default(),
            map: MapRenderer::new(),
            highlighted: None,
            filter: VehicleFilter::default(),
        }
    }

    /// Creates the map surface and draws whatever is already known.
    pub fn mount_map(&mut self, create: impl FnOnce(LatLng, u8) -> S) -> bool {
        let vehicles = self.vehicles.vehicles(Utc::now());
        if !self.map.mount(&vehicles, create) {
            return false;
        }
        self.refresh_map();
        self.map.reconcile_geofences(&self.geofences);
        true
    }

    pub fn teardown(&mut self) {
        self.map.unmount();
    }

    fn refresh_map(&mut self) {
        let vehicles = self.vehicles.vehicles(Utc::now());
        self.map.reconcile_vehicles(&vehicles, Instant::now());
    }

    pub fn load_vehicles(&mut self, snapshot: Result<Vec<Vehicle>>) {
        match snapshot {
            Ok(vehicles) => self.vehicles.load_snapshot(vehicles),
            // not fatal, live updates still fill the collection
            Err(err) => error!(error = %err, "failed to load initial vehicles"),
        }
        self.refresh_map();
    }

    pub fn apply_vehicle_event(&mut self, event: FeedEvent<Vehicle>) {
        let changed = matches!(event, FeedEvent::Item(_));
        self.vehicles.apply(event);
        if changed {
            self.refresh_map();
        }
    }

    pub fn apply_alert_event(&mut self, event: FeedEvent<Alert>) {
        self.alerts.apply(event);
    }

    pub fn apply_stats(&mut self, stats: Result<FleetStats>) {
        self.stats.update(stats);
    }

    pub fn load_geofences(&mut self, geofences: Result<Vec<GeoFence>>) {
        self.geofences.finish(geofences);
        self.map.reconcile_geofences(&self.geofences);
    }

    fn highlight(&mut self, vehicle_id: Option<String>) {
        debug!(vehicle_id = ?vehicle_id, "highlight");
        self.highlighted = vehicle_id;
        let vehicles = self.vehicles.vehicles(Utc::now());
        self.map.set_highlighted(self.highlighted.as_deref(), &vehicles, Instant::now());
        self.map.reconcile_vehicles(&vehicles, Instant::now());
    }

    /// A vehicle was picked in the list or on the map: toggles its highlight.
    pub fn select_vehicle(&mut self, vehicle_id: &str) {
        let next = if self.highlighted.as_deref() == Some(vehicle_id) {
            None
        } else {
            Some(vehicle_id.to_string())
        };
        self.highlight(next);
    }

    pub fn alert_clicked(&mut self, vehicle_id: &str) {
        self.highlight(Some(vehicle_id.to_string()));
    }

    pub fn marker_clicked(&mut self, vehicle_id: &str) {
        if self.map.marker_clicked(vehicle_id).is_some() {
            self.select_vehicle(vehicle_id);
        }
    }

    /// Advances map animations. Returns whether any is still running.
    pub fn frame(&mut self) -> bool {
        self.map.frame(Instant::now())
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    pub fn vehicles(&self, now: DateTime<Utc>) -> Vec<Vehicle> {
        self.vehicles.vehicles(now)
    }

    pub fn vehicle(&self, vehicle_id: &str, now: DateTime<Utc>) -> Option<Vehicle> {
        self.vehicles.get(vehicle_id, now)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts()
    }

    pub fn alerts_for(&self, vehicle_id: &str) -> Vec<Alert> {
        self.alerts.by_vehicle(vehicle_id)
    }

    pub fn fleet_stats(&self) -> Option<FleetStats> {
        self.stats.current()
    }

    pub fn geofences(&self) -> &GeofenceStore {
        &self.geofences
    }

    pub fn map(&self) -> &MapRenderer<S> {
        &self.map
    }

    pub fn is_live(&self) -> bool {
        self.vehicles.is_connected() && self.alerts.is_connected()
    }

    pub fn stats_bar(&self, now: DateTime<Utc>) -> StatsBar {
        view::stats_bar(&self.vehicles.vehicles(now), &self.alerts.alerts(), self.is_live(), now)
    }

    pub fn vehicle_list(&self, now: DateTime<Utc>) -> VehicleList {
        view::vehicle_list(&self.vehicles.vehicles(now), &self.filter, self.highlighted(), now)
    }

    pub fn alert_rows(&self, now: DateTime<Utc>) -> Vec<view::AlertRow> {
        view::alert_rows(&self.alerts.alerts(), now)
    }
}
