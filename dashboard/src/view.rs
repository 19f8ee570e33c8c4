use chrono::{DateTime, Utc};

use crate::status::{self, StatusCounts};
use crate::types::{Alert, AlertType, Vehicle, VehicleStatus};

/// More alerts than this in the last hour shows the counter as critical.
const ALERT_WARNING_LEVEL: u64 = 5;

/// Local search and region filter of the vehicle list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub search: String,
    /// `None` shows every region.
    pub region: Option<String>,
}

impl VehicleFilter {
    pub fn matches(&self, vehicle: &Vehicle) -> bool {
        let search = self.search.to_lowercase();
        let matches_search = vehicle.vehicle_id.to_lowercase().contains(&search);
        let matches_region = match &self.region {
            None => true,
            Some(region) => vehicle.region.as_deref() == Some(region.as_str()),
        };
        matches_search && matches_region
    }
}

/// Distinct regions in first-seen order.
pub fn regions(vehicles: &[Vehicle]) -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    for region in vehicles.iter().filter_map(|v| v.region.as_deref()) {
        if !region.is_empty() && !regions.iter().any(|r| r == region) {
            regions.push(region.to_string());
        }
    }
    regions
}

/// Relative age in the style "5 minutes ago".
pub fn time_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - timestamp).num_seconds();
    if seconds < 0 {
        return "just now".to_string();
    }
    let minutes = (seconds as f64 / 60.0).round() as i64;
    let plural = |n: i64, unit: &str| if n == 1 { format!("1 {unit}") } else { format!("{n} {unit}s") };
    match minutes {
        0 => "less than a minute ago".to_string(),
        1..=44 => format!("{} ago", plural(minutes, "minute")),
        45..=1439 => {
            let hours = ((minutes as f64) / 60.0).round().max(1.0) as i64;
            format!("about {} ago", plural(hours, "hour"))
        }
        _ => {
            let days = ((minutes as f64) / 1440.0).round().max(1.0) as i64;
            format!("{} ago", plural(days, "day"))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRow {
    pub vehicle_id: String,
    pub status: VehicleStatus,
    pub speed_kph: i64,
    pub last_seen: String,
    pub region: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleList {
    pub rows: Vec<VehicleRow>,
    pub counts: StatusCounts,
    pub regions: Vec<String>,
}

pub fn vehicle_list(
    vehicles: &[Vehicle],
    filter: &VehicleFilter,
    selected: Option<&str>,
    now: DateTime<Utc>,
) -> VehicleList {
    let rows = vehicles
        .iter()
        .filter(|v| filter.matches(v))
        .map(|v| VehicleRow {
            vehicle_id: v.vehicle_id.clone(),
            status: v.status.unwrap_or(VehicleStatus::Online),
            speed_kph: v.speed_kph.round() as i64,
            last_seen: time_ago(v.timestamp, now),
            region: v.region.clone(),
            selected: selected == Some(v.vehicle_id.as_str()),
        })
        .collect();

    VehicleList { rows, counts: status::count_by_status(vehicles), regions: regions(vehicles) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub id: String,
    pub vehicle_id: String,
    pub alert_type: AlertType,
    pub label: &'static str,
    pub message: String,
    pub age: String,
    /// The newest alert is marked for emphasis.
    pub is_new: bool,
}

pub fn alert_rows(alerts: &[Alert], now: DateTime<Utc>) -> Vec<AlertRow> {
    alerts
        .iter()
        .enumerate()
        .map(|(index, alert)| AlertRow {
            id: alert.id.clone(),
            vehicle_id: alert.vehicle_id.clone(),
            alert_type: alert.alert_type,
            label: alert.alert_type.label(),
            message: status::alert_message(alert),
            age: time_ago(alert.timestamp, now),
            is_new: index == 0,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsBar {
    /// Both channels connected.
    pub live: bool,
    pub online: u64,
    pub total: usize,
    pub alerts_last_hour: u64,
    pub alerts_critical: bool,
    pub average_speed: f64,
}

impl StatsBar {
    pub fn connection_label(&self) -> &'static str {
        if self.live {
            "Live"
        } else {
            "Disconnected"
        }
    }
}

pub fn stats_bar(vehicles: &[Vehicle], alerts: &[Alert], live: bool, now: DateTime<Utc>) -> StatsBar {
    let stats = status::local_stats(vehicles, alerts, now);
    StatsBar {
        live,
        online: stats.total_online,
        total: vehicles.len(),
        alerts_last_hour: stats.alerts_last_hour,
        alerts_critical: stats.alerts_last_hour > ALERT_WARNING_LEVEL,
        average_speed: stats.average_speed,
    }
}
