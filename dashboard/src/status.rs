use chrono::{DateTime, Duration, Utc};

use crate::normalize;
use crate::types::{Alert, AlertDetails, FleetStats, Vehicle, VehicleStatus, ZoneAction};

const OFFLINE_AFTER_MINUTES: f64 = 30.0;
const IDLE_AFTER_MINUTES: f64 = 10.0;
const IDLE_BELOW_KPH: f64 = 5.0;

/// Classifies a vehicle from its speed and the age of its last fix.
///
/// Offline after 30 minutes of silence; idle after 10 minutes or when slower
/// than 5 kph; online otherwise.
pub fn classify(speed_kph: f64, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> VehicleStatus {
    let minutes = (now - timestamp).num_milliseconds() as f64 / 60_000.0;
    if minutes > OFFLINE_AFTER_MINUTES {
        VehicleStatus::Offline
    } else if minutes > IDLE_AFTER_MINUTES || speed_kph < IDLE_BELOW_KPH {
        VehicleStatus::Idle
    } else {
        VehicleStatus::Online
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub online: usize,
    pub idle: usize,
    pub offline: usize,
}

pub fn count_by_status(vehicles: &[Vehicle]) -> StatusCounts {
    vehicles.iter().fold(StatusCounts::default(), |mut counts, v| {
        match v.status {
            Some(VehicleStatus::Online) => counts.online += 1,
            Some(VehicleStatus::Idle) => counts.idle += 1,
            Some(VehicleStatus::Offline) => counts.offline += 1,
            None => {}
        }
        counts
    })
}

/// Aggregates computed locally from the vehicle and alert collections, used by
/// the stats bar. Recomputed from scratch on every call.
pub fn local_stats(vehicles: &[Vehicle], alerts: &[Alert], now: DateTime<Utc>) -> FleetStats {
    let hour_ago = now - Duration::hours(1);
    let average_speed = if vehicles.is_empty() {
        0.0
    } else {
        (vehicles.iter().map(|v| v.speed_kph).sum::<f64>() / vehicles.len() as f64).round()
    };

    FleetStats {
        total_online: count_by_status(vehicles).online as u64,
        alerts_last_hour: alerts.iter().filter(|a| a.timestamp > hour_ago).count() as u64,
        average_speed,
    }
}

/// One-line human description of an alert.
pub fn alert_message(alert: &Alert) -> String {
    match normalize::alert_details(alert) {
        AlertDetails::Speeding { excess, .. } => format!("Exceeded speed limit by {excess} kph"),
        AlertDetails::Idle { idle_minutes } => format!("Idle for {idle_minutes} minutes"),
        AlertDetails::Geofence { zone, action: ZoneAction::Entered } => format!("Entered {zone}"),
        AlertDetails::Geofence { zone, action: ZoneAction::Exited } => format!("Exited {zone}"),
    }
}
