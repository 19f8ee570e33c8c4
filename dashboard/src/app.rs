use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::map::MapSurface;
use crate::source::{DataSource, Shutdown};
use crate::types::{FleetStats, GeoFence, Vehicle};

/// Results of fetches running off the loop.
enum Fetched {
    Vehicles(Result<Vec<Vehicle>>),
    Stats(Result<FleetStats>),
    Geofences(Result<Vec<GeoFence>>),
}

/// Runs the dashboard until `shutdown` fires, then tears the map down.
pub async fn run<S: MapSurface>(
    config: &Config,
    source: Arc<dyn DataSource>,
    dashboard: &mut Dashboard<S>,
    mut shutdown: Shutdown,
) {
    let (fetch_tx, mut fetch_rx) = mpsc::channel::<Fetched>(16);

    spawn_fetch(&fetch_tx, &source, |s| async move { Fetched::Vehicles(s.vehicle_snapshot().await) });
    spawn_fetch(&fetch_tx, &source, |s| async move { Fetched::Geofences(s.geofences().await) });
    spawn_stats_poller(
        fetch_tx.clone(),
        Arc::clone(&source),
        Duration::from_secs(config.stats_poll_interval_secs),
        shutdown.clone(),
    );
    drop(fetch_tx);

    let mut vehicle_rx = source.vehicle_feed(shutdown.clone());
    let mut alert_rx = source.alert_feed(shutdown.clone());

    let mut frame = time::interval(Duration::from_millis(config.frame_interval_millis.max(1)));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let summary_period = Duration::from_secs(config.summary_interval_secs.max(1));
    let mut summary = time::interval_at(Instant::now() + summary_period, summary_period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(event) = vehicle_rx.recv() => dashboard.apply_vehicle_event(event),
            Some(event) = alert_rx.recv() => dashboard.apply_alert_event(event),
            Some(fetched) = fetch_rx.recv() => match fetched {
                Fetched::Vehicles(result) => dashboard.load_vehicles(result),
                Fetched::Stats(result) => dashboard.apply_stats(result),
                Fetched::Geofences(result) => dashboard.load_geofences(result),
            },
            _ = frame.tick() => {
                dashboard.frame();
            }
            _ = summary.tick() => log_summary(dashboard),
        }
    }

    dashboard.teardown();
    info!("dashboard stopped");
}

fn spawn_fetch<F, Fut>(tx: &mpsc::Sender<Fetched>, source: &Arc<dyn DataSource>, fetch: F)
where
    F: FnOnce(Arc<dyn DataSource>) -> Fut,
    Fut: std::future::Future<Output = Fetched> + Send + 'static,
{
    let tx = tx.clone();
    let fut = fetch(Arc::clone(source));
    tokio::spawn(async move {
        // the loop may already be gone
        let _ = tx.send(fut.await).await;
    });
}

/// Polls fleet stats immediately and then every `period`.
fn spawn_stats_poller(
    tx: mpsc::Sender<Fetched>,
    source: Arc<dyn DataSource>,
    period: Duration,
    mut shutdown: Shutdown,
) {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let stats = source.fleet_stats().await;
            if tx.send(Fetched::Stats(stats)).await.is_err() {
                break;
            }
        }
    });
}

fn log_summary<S: MapSurface>(dashboard: &Dashboard<S>) {
    let now = Utc::now();
    let bar = dashboard.stats_bar(now);
    let latest = dashboard.alert_rows(now).into_iter().next();
    info!(
        connection = bar.connection_label(),
        online = bar.online,
        total = bar.total,
        alerts_last_hour = bar.alerts_last_hour,
        average_speed = bar.average_speed,
        backend_online = dashboard.fleet_stats().map(|s| s.total_online),
        markers = dashboard.map().marker_count(),
        geofences = dashboard.map().polygon_count(),
        latest_alert = latest.as_ref().map(|row| row.message.as_str()),
        "fleet summary"
    );
}
