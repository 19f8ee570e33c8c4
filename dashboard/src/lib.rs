//! Fleet-tracking dashboard core.
//!
//! Vehicles, alerts, stats and geofences flow one way: a [`source::DataSource`]
//! feeds the stores, the stores feed derived state, and the [`dashboard`]
//! renders views and reconciles a [`map::MapSurface`]. The only thing flowing
//! back is which vehicle is highlighted.

pub mod app;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod map;
pub mod normalize;
pub mod source;
pub mod sse;
pub mod status;
pub mod store;
pub mod types;
pub mod view;

pub use config::{Config, SourceMode};
pub use dashboard::Dashboard;
pub use error::{Error, Result};
