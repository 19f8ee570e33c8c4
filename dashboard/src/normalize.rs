//! Wire normalization.
//!
//! Every inbound record passes through exactly one function here before it
//! reaches a store. Field names vary between backend versions, numbers may
//! arrive as strings, and `details` may be JSON text; after this step the rest
//! of the crate only deals with the canonical types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::types::{
    Alert, AlertDetails, AlertType, FleetStats, GeoFence, Vehicle, VehicleStatus, ZoneAction,
};

const UNKNOWN_VEHICLE: &str = "unknown";
const UNKNOWN_REGION: &str = "Unknown";
const UNKNOWN_ZONE: &str = "Unknown zone";
const DEFAULT_SPEED_LIMIT: f64 = 80.0;

/// First present, non-null value among `names`.
fn field<'a>(raw: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| raw.get(*name).filter(|v| !v.is_null()))
}

/// Numeric coercion with a zero fallback for missing or non-numeric values.
fn number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an ISO-8601 instant. Offset-less values (the backend's
/// `LocalDateTime`) are read as UTC. Anything else falls back to `now`.
fn timestamp(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(Value::String(raw)) = value else {
        return now;
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    warn!(timestamp = %raw, "unparseable timestamp, using receive time");
    now
}

/// Normalizes one raw vehicle record.
///
/// Any `status` on the wire is kept lower-cased but is overwritten by the
/// derived status whenever the vehicle is read from its store.
pub fn vehicle(raw: &Value, now: DateTime<Utc>) -> Vehicle {
    Vehicle {
        vehicle_id: text(field(raw, &["vehicleId", "vehicle_id"]))
            .unwrap_or_else(|| UNKNOWN_VEHICLE.to_string()),
        lat: number(field(raw, &["lat", "latitude"])),
        lng: number(field(raw, &["lng", "longitude"])),
        speed_kph: number(field(raw, &["speedKph", "speed_kph", "speed"])),
        heading: number(field(raw, &["heading"])),
        timestamp: timestamp(field(raw, &["timestamp", "lastUpdate"]), now),
        status: field(raw, &["status"]).and_then(Value::as_str).and_then(VehicleStatus::parse),
        region: Some(text(field(raw, &["region"])).unwrap_or_else(|| UNKNOWN_REGION.to_string())),
    }
}

/// Normalizes the initial snapshot. Anything other than an array is an empty
/// fleet.
pub fn vehicle_snapshot(raw: &Value, now: DateTime<Utc>) -> Vec<Vehicle> {
    match raw {
        Value::Array(items) => items.iter().map(|item| vehicle(item, now)).collect(),
        _ => {
            warn!("vehicle snapshot is not an array, treating as empty");
            Vec::new()
        }
    }
}

/// Maps a raw alert type onto the closed enumeration. Any type mentioning
/// GEOFENCE (`GEOFENCE_ENTER`, `GEOFENCE_EXIT`, ...) collapses to
/// [`AlertType::Geofence`]; unrecognised types are reported as speeding.
pub fn alert_type(raw: Option<&str>) -> AlertType {
    let upper = raw.map(str::to_uppercase);
    match upper.as_deref() {
        Some(t) if t.contains("GEOFENCE") => AlertType::Geofence,
        Some("IDLE") => AlertType::Idle,
        Some("SPEEDING") => AlertType::Speeding,
        other => {
            warn!(alert_type = ?other, "unknown alert type, defaulting to SPEEDING");
            AlertType::Speeding
        }
    }
}

/// `details` may be a JSON object or a JSON-encoded string. Text that does
/// not parse to an object yields an empty mapping.
pub fn details(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(details = %encoded, "alert details string is not an object");
                Map::new()
            }
            Err(err) => {
                warn!(details = %encoded, error = %err, "failed to parse alert details string");
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

/// Normalizes one raw alert record. A missing id gets a client-generated one.
pub fn alert(raw: &Value, now: DateTime<Utc>) -> Alert {
    Alert {
        id: text(field(raw, &["id"])).unwrap_or_else(|| Uuid::new_v4().to_string()),
        vehicle_id: text(field(raw, &["vehicleId", "vehicle_id"]))
            .unwrap_or_else(|| UNKNOWN_VEHICLE.to_string()),
        alert_type: alert_type(field(raw, &["alertType", "alert_type"]).and_then(Value::as_str)),
        details: details(field(raw, &["details"])),
        timestamp: timestamp(field(raw, &["timestamp"]), now),
        lat: number(field(raw, &["lat", "latitude"])),
        lng: number(field(raw, &["lng", "longitude"])),
    }
}

/// Reads the first non-zero number among `names`, the way the dashboard has
/// always chained legacy detail fields.
fn detail_number(details: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().map(|name| number(details.get(*name))).find(|n| *n != 0.0)
}

fn detail_text(details: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| text(details.get(*name)))
}

/// Resolves the canonical detail shape for an alert.
pub fn alert_details(alert: &Alert) -> AlertDetails {
    let d = &alert.details;
    match alert.alert_type {
        AlertType::Speeding => {
            let speed_kph = detail_number(d, &["speedKph", "speed"]).unwrap_or(0.0);
            let threshold =
                detail_number(d, &["threshold", "speed_limit"]).unwrap_or(DEFAULT_SPEED_LIMIT);
            let excess =
                detail_number(d, &["excess"]).unwrap_or_else(|| (speed_kph - threshold).round());
            AlertDetails::Speeding { speed_kph, threshold, excess }
        }
        AlertType::Idle => AlertDetails::Idle {
            idle_minutes: detail_number(d, &["idleMinutes", "idle_minutes"]).unwrap_or(0.0),
        },
        AlertType::Geofence => {
            let zone = detail_text(d, &["geofenceName", "geofence_name", "geofence", "zone"])
                .unwrap_or_else(|| UNKNOWN_ZONE.to_string());
            let action = match detail_text(d, &["action"]).as_deref() {
                None | Some("entered") => ZoneAction::Entered,
                Some(_) => ZoneAction::Exited,
            };
            AlertDetails::Geofence { zone, action }
        }
    }
}

/// Maps the stats endpoint body. Each metric accepts both of its historical
/// spellings.
pub fn fleet_stats(raw: &Value) -> FleetStats {
    let count = |names: &[&str]| {
        let n = number(field(raw, names));
        if n > 0.0 { n.round() as u64 } else { 0 }
    };
    FleetStats {
        total_online: count(&["totalOnline", "onlineVehicles"]),
        alerts_last_hour: count(&["alertsLastHour"]),
        average_speed: number(field(raw, &["averageSpeed", "avgSpeed"])),
    }
}

fn ring(raw: Option<&Value>) -> Vec<[f64; 2]> {
    // Polygon coordinates are a list of rings; only the outer one is kept.
    let outer = raw.and_then(Value::as_array).and_then(|rings| rings.first());
    outer
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(Value::as_array)
                .filter(|pair| pair.len() >= 2)
                .map(|pair| [number(pair.first()), number(pair.get(1))])
                .collect()
        })
        .unwrap_or_default()
}

/// Parses the geofence endpoint body: either an array of
/// `{id, name, coordinates}` records or a GeoJSON `FeatureCollection`.
pub fn geofences(raw: &Value) -> Vec<GeoFence> {
    if let Some(features) = raw.get("features").and_then(Value::as_array) {
        return features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let properties = feature.get("properties").unwrap_or(&Value::Null);
                let id = field(feature, &["id"])
                    .or_else(|| field(properties, &["id"]))
                    .and_then(Value::as_i64)
                    .unwrap_or(index as i64 + 1);
                GeoFence {
                    id,
                    name: text(field(properties, &["name"])).unwrap_or_default(),
                    coordinates: ring(feature.get("geometry").and_then(|g| g.get("coordinates"))),
                }
            })
            .collect();
    }

    match raw {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| GeoFence {
                id: field(item, &["id"]).and_then(Value::as_i64).unwrap_or(index as i64 + 1),
                name: text(field(item, &["name"])).unwrap_or_default(),
                coordinates: ring(field(item, &["coordinates"])),
            })
            .collect(),
        _ => {
            warn!("geofence payload is neither an array nor a FeatureCollection");
            Vec::new()
        }
    }
}
