use std::net::SocketAddr;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use fleet_dashboard::source::{shutdown_pair, DataSource, FeedEvent, LiveSource};
use fleet_dashboard::types::{AlertType, VehicleStatus};
use fleet_dashboard::{Config, Error};

const SNAPSHOT: &str = r#"[
    {"vehicleId":"TRK-01","latitude":24.9,"longitude":67.1,"speed":55,"heading":90,
     "timestamp":"2026-03-01T12:00:00Z","region":"Karachi","status":"online"},
    {"vehicle_id":"TRK-02","lat":"24.8","lng":67.0}
]"#;

const GEOJSON: &str = r#"{
    "type":"FeatureCollection",
    "features":[{
        "type":"Feature",
        "id":9,
        "properties":{"name":"Port"},
        "geometry":{"type":"Polygon","coordinates":[[[66.97,24.84],[66.99,24.84],[66.99,24.86],[66.97,24.84]]]}
    }]
}"#;

const VEHICLE_STREAM: &str = "retry: 3000\n\n\
event: keepalive\ndata: {}\n\n\
event: vehicle-update\ndata: {\"vehicleId\":\"TRK-01\",\"lat\":24.91,\"lng\":67.11,\"speedKph\":61}\n\n\
event: vehicle-update\ndata: not json\n\n\
event: position\ndata: {\"vehicleId\":\"TRK-09\"}\n\n";

const ALERT_STREAM: &str = ": connected\n\n\
event: alert\ndata: {\"id\":\"a-1\",\"vehicleId\":\"TRK-08\",\"alertType\":\"SPEEDING\",\"details\":\"{\\\"speedKph\\\":120,\\\"threshold\\\":80}\"}\n\n\
data: {\"id\":\"a-2\",\"vehicleId\":\"TRK-03\",\"alertType\":\"IDLE\"}\n\n\
event: alert\ndata: {\"id\":\"a-3\",\"vehicleId\":\"TRK-05\",\"alertType\":\"IDLE\",\"details\":\"{bad json\"}\n\n\
event: alert\ndata: {broken\n\n";

/// Minimal HTTP/1.1 backend: one request per connection, closed after the
/// response. Event streams end when the connection does.
async fn spawn_backend(stats_status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(serve(stream, stats_status));
        }
    });
    addr
}

async fn serve(mut stream: TcpStream, stats_status: u16) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    let response = match path.as_str() {
        "/api/vehicles/status/all" => json_response(200, SNAPSHOT),
        "/api/vehicles/stats" => json_response(stats_status, r#"{"totalOnline":4,"alertsLastHour":2,"averageSpeed":47.5}"#),
        "/api/geofences/geojson" => json_response(200, GEOJSON),
        "/api/stream/vehicles" => stream_response(VEHICLE_STREAM),
        "/api/stream/alerts" => stream_response(ALERT_STREAM),
        _ => json_response(404, "{}"),
    };
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn stream_response(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}")
}

fn source(addr: SocketAddr) -> LiveSource {
    let config = Config {
        api_base_url: format!("http://{addr}/api"),
        sse_url: Some(format!("http://{addr}/api/stream")),
        ..Config::default()
    };
    LiveSource::new(&config)
}

async fn next<T>(rx: &mut mpsc::Receiver<FeedEvent<T>>) -> FeedEvent<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("feed went quiet")
        .expect("feed closed")
}

#[tokio::test]
async fn snapshot_accepts_both_field_spellings() {
    let addr = spawn_backend(200).await;
    let vehicles = source(addr).vehicle_snapshot().await.unwrap();

    assert_eq!(vehicles.len(), 2);
    assert_eq!(vehicles[0].vehicle_id, "TRK-01");
    assert_eq!(vehicles[0].speed_kph, 55.0);
    assert_eq!(vehicles[0].timestamp, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    assert_eq!(vehicles[0].status, Some(VehicleStatus::Online));
    assert_eq!(vehicles[1].vehicle_id, "TRK-02");
    assert_eq!(vehicles[1].lat, 24.8);
    assert_eq!(vehicles[1].region.as_deref(), Some("Unknown"));
}

#[tokio::test]
async fn stats_and_geofences() {
    let addr = spawn_backend(200).await;
    let source = source(addr);

    let stats = source.fleet_stats().await.unwrap();
    assert_eq!(stats.total_online, 4);
    assert_eq!(stats.alerts_last_hour, 2);
    assert_eq!(stats.average_speed, 47.5);

    let fences = source.geofences().await.unwrap();
    assert_eq!(fences.len(), 1);
    assert_eq!(fences[0].id, 9);
    assert_eq!(fences[0].name, "Port");
    let ring = fences[0].lat_lngs();
    assert_eq!((ring[0].lat, ring[0].lng), (24.84, 66.97));
}

#[tokio::test]
async fn rejected_stats_read_as_zeros() {
    let addr = spawn_backend(503).await;
    let stats = source(addr).fleet_stats().await.unwrap();
    assert_eq!(stats, Default::default());
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = source(addr).geofences().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err}");
}

#[tokio::test]
async fn vehicle_channel_reports_open_keepalive_and_updates() {
    let addr = spawn_backend(200).await;
    let (trigger, shutdown) = shutdown_pair();
    let mut rx = source(addr).vehicle_feed(shutdown);

    assert_eq!(next(&mut rx).await, FeedEvent::Open);
    assert_eq!(next(&mut rx).await, FeedEvent::Keepalive);
    let FeedEvent::Item(vehicle) = next(&mut rx).await else {
        panic!("expected a vehicle update");
    };
    assert_eq!(vehicle.vehicle_id, "TRK-01");
    assert_eq!(vehicle.speed_kph, 61.0);
    // unparseable and unrelated events are skipped, then the body ends
    assert!(matches!(next(&mut rx).await, FeedEvent::Error(_)));

    trigger.trigger();
}

#[tokio::test]
async fn alert_channel_accepts_unnamed_messages() {
    let addr = spawn_backend(200).await;
    let (trigger, shutdown) = shutdown_pair();
    let mut rx = source(addr).alert_feed(shutdown);

    assert_eq!(next(&mut rx).await, FeedEvent::Open);
    let FeedEvent::Item(first) = next(&mut rx).await else {
        panic!("expected an alert");
    };
    assert_eq!(first.id, "a-1");
    assert_eq!(first.alert_type, AlertType::Speeding);
    assert_eq!(first.details.get("speedKph"), Some(&serde_json::json!(120)));

    let FeedEvent::Item(second) = next(&mut rx).await else {
        panic!("expected an alert");
    };
    assert_eq!(second.id, "a-2");
    assert_eq!(second.alert_type, AlertType::Idle);

    // unreadable details still deliver the alert, with nothing in it
    let FeedEvent::Item(third) = next(&mut rx).await else {
        panic!("expected an alert");
    };
    assert_eq!(third.id, "a-3");
    assert!(third.details.is_empty());
    assert!(matches!(next(&mut rx).await, FeedEvent::Error(_)));

    trigger.trigger();
}

#[tokio::test]
async fn channel_reconnects_after_failure() {
    let addr = spawn_backend(200).await;
    let (trigger, shutdown) = shutdown_pair();
    let mut rx = source(addr).alert_feed(shutdown);

    let mut opens = 0;
    while opens < 2 {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(FeedEvent::Open)) => opens += 1,
            Ok(Some(_)) => {}
            _ => panic!("channel did not reopen"),
        }
    }

    trigger.trigger();
    // the channel task drops its sender once it notices
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}
