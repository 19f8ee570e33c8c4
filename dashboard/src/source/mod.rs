use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::{Config, SourceMode};
use crate::error::Result;
use crate::types::{Alert, FleetStats, GeoFence, Vehicle};

mod live;
mod simulate;

pub use live::LiveSource;
pub use simulate::{seed_alerts, seed_geofences, seed_vehicles, SimulatedSource};

pub const FEED_BUFFER: usize = 256;

/// What a streaming channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    Open,
    Item(T),
    Keepalive,
    /// The channel failed. It may reopen later and report `Open` again.
    Error(String),
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Full snapshot of all known vehicles, fetched once at start-up.
    async fn vehicle_snapshot(&self) -> Result<Vec<Vehicle>>;

    async fn fleet_stats(&self) -> Result<FleetStats>;

    async fn geofences(&self) -> Result<Vec<GeoFence>>;

    /// Starts the vehicle update channel. It runs until `shutdown` fires or
    /// the receiver is dropped.
    fn vehicle_feed(&self, shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Vehicle>>;

    /// Starts the alert channel, independent of the vehicle channel.
    fn alert_feed(&self, shutdown: Shutdown) -> mpsc::Receiver<FeedEvent<Alert>>;
}

pub fn from_config(config: &Config) -> Arc<dyn DataSource> {
    match config.mode() {
        SourceMode::Live => Arc::new(LiveSource::new(config)),
        SourceMode::Simulated => Arc::new(SimulatedSource::new(config)),
    }
}

/// Cancellation token tied to the lifetime of the owning dashboard.
///
/// Fires when [`ShutdownTrigger::trigger`] is called or the trigger is dropped.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_pair() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even when every receiver is gone
        self.tx.send_replace(true);
    }

    /// Triggers once `signal` resolves. If the signal handler could not be
    /// installed the trigger is kept alive and never fires.
    pub async fn trigger_on<F>(self, signal: F)
    where
        F: Future<Output = io::Result<()>>,
    {
        match signal.await {
            Ok(()) => {
                info!("shutting down");
                self.trigger();
            }
            Err(err) => {
                error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
