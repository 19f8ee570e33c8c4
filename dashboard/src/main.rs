use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use fleet_dashboard::map::{MapSurface, MarkerIcon};
use fleet_dashboard::types::{LatLng, Vehicle};
use fleet_dashboard::{app, source, Config, Dashboard};

/// Map surface for headless runs: every drawing call becomes a log line.
#[derive(Debug, Default)]
struct LogSurface {
    markers: usize,
    polygons: usize,
}

impl MapSurface for LogSurface {
    fn add_marker(&mut self, vehicle_id: &str, position: LatLng, icon: MarkerIcon, vehicle: &Vehicle) {
        self.markers += 1;
        info!(
            vehicle_id,
            lat = position.lat,
            lng = position.lng,
            status = %icon.status,
            region = vehicle.region.as_deref(),
            "marker added"
        );
    }

    fn move_marker(&mut self, vehicle_id: &str, position: LatLng) {
        debug!(vehicle_id, lat = position.lat, lng = position.lng, "marker moved");
    }

    fn update_marker(&mut self, vehicle_id: &str, icon: MarkerIcon, vehicle: &Vehicle) {
        debug!(
            vehicle_id,
            status = %icon.status,
            heading = icon.heading,
            highlighted = icon.highlighted,
            speed_kph = vehicle.speed_kph,
            "marker refreshed"
        );
    }

    fn remove_marker(&mut self, vehicle_id: &str) {
        self.markers = self.markers.saturating_sub(1);
        info!(vehicle_id, "marker removed");
    }

    fn open_popup(&mut self, vehicle_id: &str) {
        info!(vehicle_id, "popup opened");
    }

    fn add_polygon(&mut self, geofence_id: i64, name: &str, ring: &[LatLng]) {
        self.polygons += 1;
        info!(geofence_id, name, vertices = ring.len(), "geofence drawn");
    }

    fn set_polygon_ring(&mut self, geofence_id: i64, ring: &[LatLng]) {
        debug!(geofence_id, vertices = ring.len(), "geofence updated");
    }

    fn remove_polygon(&mut self, geofence_id: i64) {
        self.polygons = self.polygons.saturating_sub(1);
        info!(geofence_id, "geofence removed");
    }

    fn fly_to(&mut self, center: LatLng, zoom: u8, duration: Duration) {
        info!(lat = center.lat, lng = center.lng, zoom, ?duration, "flying to");
    }

    fn dispose(&mut self) {
        info!(markers = self.markers, polygons = self.polygons, "map surface removed");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load()?;
    info!(mode = ?config.mode(), api = %config.api_base_url, "dashboard starting");

    let source = source::from_config(&config);
    let (trigger, shutdown) = source::shutdown_pair();
    tokio::spawn(trigger.trigger_on(tokio::signal::ctrl_c()));

    let mut dashboard: Dashboard<LogSurface> = Dashboard::new();
    dashboard.mount_map(|_, _| LogSurface::default());

    app::run(&config, source, &mut dashboard, shutdown).await;
    Ok(())
}
