use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{DataSource, FeedEvent, Shutdown, FEED_BUFFER};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::normalize;
use crate::sse::{self, SseEvent, DEFAULT_RETRY};
use crate::types::{Alert, FleetStats, GeoFence, Vehicle};

const VEHICLE_EVENT: &str = "vehicle-update";
const ALERT_EVENT: &str = "alert";
const FALLBACK_ALERT_EVENT: &str = "message";
const KEEPALIVE_EVENT: &str = "keepalive";

/// Backend-connected source: REST endpoints under `api_base_url`, push
/// channels under `sse_url`.
#[derive(Debug, Clone)]
pub struct LiveSource {
    client: Client,
    api_base_url: String,
    sse_url: String,
}

impl LiveSource {
    pub fn new(config: &Config) -> Self {
        LiveSource {
            client: Client::new(),
            api_base_url: config.api_base_url.clone(),
            sse_url: config.sse_url.clone().unwrap_or_default(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.api_base_url, path);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { status: status.as_u16(), url });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn spawn_channel<T, F>(&self, path: &str, shutdown: Shutdown, decode: F) -> mpsc::Receiver<FeedEvent<T>>
    where
        T: Send + 'static,
        F: Fn(&SseEvent) -> Option<T> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let url = format!("{}{}", self.sse_url, path);
        tokio::spawn(run_channel(self.client.clone(), url, tx, shutdown, decode));
        rx
    }
}

#[async_trait]
impl DataSource for LiveSource {
    async fn vehicle_snapshot(&self) -> Result<Vec<Vehicle>> {
        // a rejected or malformed snapshot is an empty fleet, not a failure
        let body = match self.get_json("/vehicles/status/all").await {
            Ok(body) => body,
            Err(err @ (Error::Status { .. } | Error::Malformed(_))) => {
                warn!(error = %err, "vehicle snapshot unusable, starting empty");
                Value::Null
            }
            Err(err) => return Err(err),
        };
        let vehicles = normalize::vehicle_snapshot(&body, Utc::now());
        info!(count = vehicles.len(), "loaded vehicle snapshot");
        Ok(vehicles)
    }

    async fn fleet_stats(&self) -> Result<FleetStats> {
        let body = match self.get_json("/vehicles/stats").await {
            Ok(body) => body,
            Err(Error::Status { status, url }) => {
                warn!(%url, status, "stats request rejected");
                Value::Null
            }
            Err(err) => return Err(err),
        };
        Ok(normalize::fleet_stats(&body))
    }

    async fn geofences(&self) -> Result<Vec<GeoFence>> {
        let body = self.get_json("/geofences/geojson").await?;
        let fences = normalize::geofences(&body);
        info!(count = fences.len(), "geofences loaded");
        Ok(fences)
    }

    fn vehicle_feed(&self, shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Vehicle>> {
        self.spawn_channel("/vehicles", shutdown, |event| {
            if event.event != VEHICLE_EVENT {
                return None;
            }
            parse(event).map(|raw| normalize::vehicle(&raw, Utc::now()))
        })
    }

    fn alert_feed(&self, shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Alert>> {
        self.spawn_channel("/alerts", shutdown, |event| {
            if event.event != ALERT_EVENT && event.event != FALLBACK_ALERT_EVENT {
                return None;
            }
            parse(event).map(|raw| normalize::alert(&raw, Utc::now()))
        })
    }
}

/// Parses an event's data as JSON. Bad payloads are logged and dropped; the
/// channel stays open.
fn parse(event: &SseEvent) -> Option<Value> {
    match serde_json::from_str(&event.data) {
        Ok(value) => Some(value),
        Err(err) => {
            error!(event = %event.event, data = %event.data, error = %err, "failed to parse event");
            None
        }
    }
}

/// Keeps one push channel alive until shutdown, reconnecting after a fixed
/// delay the way a browser event source does.
async fn run_channel<T, F>(
    client: Client,
    url: String,
    tx: mpsc::Sender<FeedEvent<T>>,
    mut shutdown: Shutdown,
    decode: F,
) where
    F: Fn(&SseEvent) -> Option<T> + Sync,
{
    loop {
        let failure = tokio::select! {
            _ = shutdown.cancelled() => break,
            failure = read_channel(&client, &url, &tx, &decode) => failure,
        };
        let Some(reason) = failure else {
            // receiver gone, nobody is listening
            break;
        };
        error!(%url, %reason, "channel error");
        if tx.send(FeedEvent::Error(reason)).await.is_err() {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(DEFAULT_RETRY) => {}
        }
    }
    debug!(%url, "channel closed");
}

/// Reads one connection to completion. Returns the failure reason, or `None`
/// when the receiving side has gone away.
async fn read_channel<T, F>(
    client: &Client,
    url: &str,
    tx: &mpsc::Sender<FeedEvent<T>>,
    decode: &F,
) -> Option<String>
where
    F: Fn(&SseEvent) -> Option<T>,
{
    let response = match sse::connect(client, url).await {
        Ok(response) => response,
        Err(err) => return Some(err.to_string()),
    };
    info!(%url, "channel connected");
    tx.send(FeedEvent::Open).await.ok()?;

    let mut events = Box::pin(sse::events(response));
    while let Some(next) = events.next().await {
        let event = match next {
            Ok(event) => event,
            Err(err) => return Some(err.to_string()),
        };
        if event.event == KEEPALIVE_EVENT {
            trace!(%url, "keepalive");
            tx.send(FeedEvent::Keepalive).await.ok()?;
            continue;
        }
        if let Some(item) = decode(&event) {
            tx.send(FeedEvent::Item(item)).await.ok()?;
        }
    }
    Some(
        Error::Channel { url: url.to_string(), reason: "stream ended".to_string() }.to_string(),
    )
}
