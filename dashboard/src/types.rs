use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display status of a vehicle. Always derived from recency and speed, see
/// [`crate::status::classify`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Online,
    Idle,
    Offline,
}

impl VehicleStatus {
    /// Parses a wire status, ignoring case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Idle => write!(f, "idle"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Last known position of a vehicle. The live collection holds one entry per
/// `vehicle_id`; no trail is kept.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub vehicle_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed_kph: f64,
    /// Degrees clockwise from north, 0..360.
    pub heading: f64,
    pub timestamp: DateTime<Utc>,
    pub status: Option<VehicleStatus>,
    pub region: Option<String>,
}

impl Vehicle {
    pub fn position(&self) -> LatLng {
        LatLng { lat: self.lat, lng: self.lng }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Speeding,
    Idle,
    Geofence,
}

impl AlertType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Speeding => "Speeding",
            Self::Idle => "Idle",
            Self::Geofence => "Geofence",
        }
    }
}

/// An alert as received. Immutable once accepted into the alert sequence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    /// Not guaranteed to reference a vehicle that is still tracked.
    pub vehicle_id: String,
    pub alert_type: AlertType,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
}

/// Whether a geofence alert reports the vehicle entering or leaving the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneAction {
    Entered,
    Exited,
}

/// Canonical reading of an alert's `details` mapping. Every field-name
/// variant the backend has used is resolved here, in
/// [`crate::normalize::alert_details`], so renderers only see this shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDetails {
    Speeding { speed_kph: f64, threshold: f64, excess: f64 },
    Idle { idle_minutes: f64 },
    Geofence { zone: String, action: ZoneAction },
}

/// Fleet-wide aggregates. Replaced wholesale on each refresh.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub total_online: u64,
    pub alerts_last_hour: u64,
    pub average_speed: f64,
}

/// A geofence zone. `coordinates` is the closed outer ring in wire order,
/// `[longitude, latitude]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoFence {
    pub id: i64,
    pub name: String,
    pub coordinates: Vec<[f64; 2]>,
}

impl GeoFence {
    /// Ring transposed to rendering order, same count and order as the wire ring.
    pub fn lat_lngs(&self) -> Vec<LatLng> {
        self.coordinates.iter().map(|&[lng, lat]| LatLng { lat, lng }).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_transposes_in_order() {
        let fence = GeoFence {
            id: 1,
            name: "Warehouse A".to_string(),
            coordinates: vec![
                [67.0232, 24.8849],
                [67.0332, 24.8849],
                [67.0332, 24.8949],
                [67.0232, 24.8849],
            ],
        };

        let ring = fence.lat_lngs();
        assert_eq!(ring.len(), fence.coordinates.len());
        for (point, [lng, lat]) in ring.iter().zip(&fence.coordinates) {
            assert_eq!(point.lat, *lat);
            assert_eq!(point.lng, *lng);
        }
    }

    #[test]
    fn status_parses_any_case() {
        assert_eq!(VehicleStatus::parse("ONLINE"), Some(VehicleStatus::Online));
        assert_eq!(VehicleStatus::parse(" Idle "), Some(VehicleStatus::Idle));
        assert_eq!(VehicleStatus::parse("parked"), None);
    }
}
