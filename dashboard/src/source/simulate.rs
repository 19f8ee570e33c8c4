use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::{DataSource, FeedEvent, Shutdown, FEED_BUFFER};
use crate::config::Config;
use crate::error::Result;
use crate::normalize;
use crate::status;
use crate::types::{Alert, AlertType, FleetStats, GeoFence, Vehicle};

const ALERT_PROBABILITY: f64 = 0.3;
const POSITION_JITTER_DEG: f64 = 0.002;
const SPEED_JITTER_KPH: f64 = 15.0;
const SPEED_CEILING_KPH: f64 = 140.0;
const HEADING_JITTER_DEG: f64 = 20.0;
const RAW_ALERT_TYPES: [&str; 4] = ["SPEEDING", "GEOFENCE_ENTER", "GEOFENCE_EXIT", "IDLE"];

/// Self-contained source used when no backend is configured. Every feed is a
/// scheduled task that stops with its [`Shutdown`] token.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    vehicle_tick: Duration,
    alert_tick: Duration,
    alert_probability: f64,
    seed: Option<u64>,
}

impl SimulatedSource {
    pub fn new(config: &Config) -> Self {
        SimulatedSource {
            vehicle_tick: Duration::from_millis(config.vehicle_tick_millis),
            alert_tick: Duration::from_millis(config.alert_tick_millis),
            alert_probability: ALERT_PROBABILITY,
            seed: None,
        }
    }

    /// Fixes the random sequence, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_alert_probability(mut self, probability: f64) -> Self {
        self.alert_probability = probability.clamp(0.0, 1.0);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Seed fleet rows: id, lat, lng, speed, heading, seconds since last fix, region.
const SEED_FLEET: [(&str, f64, f64, f64, f64, i64, &str); 8] = [
    ("TRK-01", 24.8607, 67.0011, 65.0, 45.0, 0, "Karachi"),
    ("TRK-02", 24.9056, 67.0822, 0.0, 180.0, 300, "Karachi"),
    ("TRK-03", 24.8899, 67.0282, 78.0, 90.0, 0, "Warehouse A"),
    ("TRK-04", 31.5497, 74.3436, 55.0, 270.0, 0, "Lahore"),
    ("TRK-05", 31.5204, 74.3587, 42.0, 135.0, 0, "Lahore"),
    ("TRK-06", 33.6844, 73.0479, 88.0, 0.0, 0, "Islamabad"),
    ("TRK-07", 33.7294, 73.0931, 0.0, 45.0, 900, "Islamabad"),
    ("TRK-08", 24.8700, 66.9900, 120.0, 225.0, 0, "Karachi"),
];

/// Built-in fleet the simulation starts from.
pub fn seed_vehicles(now: DateTime<Utc>) -> Vec<Vehicle> {
    SEED_FLEET
        .iter()
        .map(|&(id, lat, lng, speed_kph, heading, age_secs, region)| {
            let timestamp = now - chrono::Duration::seconds(age_secs);
            Vehicle {
                vehicle_id: id.to_string(),
                lat,
                lng,
                speed_kph,
                heading,
                timestamp,
                status: Some(status::classify(speed_kph, timestamp, now)),
                region: Some(region.to_string()),
            }
        })
        .collect()
}

fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Alerts present when the simulation starts, newest first.
pub fn seed_alerts(now: DateTime<Utc>) -> Vec<Alert> {
    let ago = |secs: i64| now - chrono::Duration::seconds(secs);
    vec![
        Alert {
            id: "1".to_string(),
            vehicle_id: "TRK-08".to_string(),
            alert_type: AlertType::Speeding,
            details: details(json!({ "speedKph": 120, "threshold": 80 })),
            timestamp: now,
            lat: 24.8700,
            lng: 66.9900,
        },
        Alert {
            id: "2".to_string(),
            vehicle_id: "TRK-02".to_string(),
            alert_type: AlertType::Idle,
            details: details(json!({ "idleMinutes": 15 })),
            timestamp: ago(60),
            lat: 24.9056,
            lng: 67.0822,
        },
        Alert {
            id: "3".to_string(),
            vehicle_id: "TRK-03".to_string(),
            alert_type: AlertType::Geofence,
            details: details(json!({ "geofenceName": "Warehouse A", "action": "entered" })),
            timestamp: ago(120),
            lat: 24.8899,
            lng: 67.0282,
        },
    ]
}

fn square(id: i64, name: &str, west: f64, south: f64, east: f64, north: f64) -> GeoFence {
    GeoFence {
        id,
        name: name.to_string(),
        coordinates: vec![[west, south], [east, south], [east, north], [west, north], [west, south]],
    }
}

/// Canned zones served in simulation.
pub fn seed_geofences() -> Vec<GeoFence> {
    vec![
        square(1, "Warehouse A", 67.0232, 24.8849, 67.0332, 24.8949),
        square(2, "Delivery Zone", 67.0300, 24.9100, 67.0500, 24.9200),
    ]
}

/// Moves one vehicle a small random step.
fn jitter(rng: &mut impl Rng, vehicle: &mut Vehicle, now: DateTime<Utc>) {
    vehicle.lat += (rng.gen::<f64>() - 0.5) * POSITION_JITTER_DEG;
    vehicle.lng += (rng.gen::<f64>() - 0.5) * POSITION_JITTER_DEG;
    vehicle.speed_kph = (vehicle.speed_kph + (rng.gen::<f64>() - 0.5) * SPEED_JITTER_KPH)
        .clamp(0.0, SPEED_CEILING_KPH);
    vehicle.heading =
        (vehicle.heading + (rng.gen::<f64>() - 0.5) * HEADING_JITTER_DEG + 360.0) % 360.0;
    vehicle.timestamp = now;
}

/// Builds a plausible alert for a random seed vehicle.
fn random_alert(rng: &mut impl Rng, fleet: &[Vehicle], now: DateTime<Utc>) -> Option<Alert> {
    let vehicle = fleet.choose(rng)?;
    let raw_type = *RAW_ALERT_TYPES.choose(rng)?;
    let alert_type = normalize::alert_type(Some(raw_type));

    let payload = match alert_type {
        AlertType::Speeding => json!({ "speedKph": 85.0 + rng.gen::<f64>() * 35.0, "threshold": 80 }),
        AlertType::Idle => json!({ "idleMinutes": 10.0 + rng.gen::<f64>() * 20.0 }),
        AlertType::Geofence => {
            let action = if rng.gen_bool(0.5) { "entered" } else { "exited" };
            json!({ "geofenceName": "Warehouse A", "action": action })
        }
    };

    Some(Alert {
        id: Uuid::new_v4().to_string(),
        vehicle_id: vehicle.vehicle_id.clone(),
        alert_type,
        details: details(payload),
        timestamp: now,
        lat: vehicle.lat,
        lng: vehicle.lng,
    })
}

#[async_trait]
impl DataSource for SimulatedSource {
    async fn vehicle_snapshot(&self) -> Result<Vec<Vehicle>> {
        Ok(seed_vehicles(Utc::now()))
    }

    async fn fleet_stats(&self) -> Result<FleetStats> {
        Ok(FleetStats { total_online: 6, alerts_last_hour: 4, average_speed: 68.0 })
    }

    async fn geofences(&self) -> Result<Vec<GeoFence>> {
        Ok(seed_geofences())
    }

    fn vehicle_feed(&self, mut shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Vehicle>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let period = self.vehicle_tick;
        let mut rng = self.rng();

        tokio::spawn(async move {
            info!("using simulated vehicles");
            let mut fleet = seed_vehicles(Utc::now());
            if tx.send(FeedEvent::Open).await.is_err() {
                return;
            }
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let now = Utc::now();
                for vehicle in &mut fleet {
                    jitter(&mut rng, vehicle, now);
                    if tx.send(FeedEvent::Item(vehicle.clone())).await.is_err() {
                        return;
                    }
                }
            }
            debug!("vehicle simulation stopped");
        });
        rx
    }

    fn alert_feed(&self, mut shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Alert>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let period = self.alert_tick;
        let probability = self.alert_probability;
        let mut rng = self.rng();

        tokio::spawn(async move {
            info!("using simulated alerts");
            let now = Utc::now();
            let fleet = seed_vehicles(now);
            if tx.send(FeedEvent::Open).await.is_err() {
                return;
            }
            // oldest first, so the newest seed ends up on top
            for alert in seed_alerts(now).into_iter().rev() {
                if tx.send(FeedEvent::Item(alert)).await.is_err() {
                    return;
                }
            }

            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !rng.gen_bool(probability) {
                    continue;
                }
                if let Some(alert) = random_alert(&mut rng, &fleet, Utc::now()) {
                    debug!(vehicle_id = %alert.vehicle_id, alert_type = ?alert.alert_type, "simulated alert");
                    if tx.send(FeedEvent::Item(alert)).await.is_err() {
                        return;
                    }
                }
            }
            debug!("alert simulation stopped");
        });
        rx
    }
}
