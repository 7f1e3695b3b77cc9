//! Water Meter Bridge Library
//!
//! Polls the tap-water vendor API for each configured meter, reconciles the
//! realtime, bill-history and usage-trend responses into one record, and
//! republishes that record as named readings.

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod observability;
pub mod readings;
pub mod reconcile;
pub mod refresh;
pub mod scheduler;
pub mod server;

// Re-export commonly used types for easier access
pub use api::WaterMeterApi;
pub use config::AppConfig;
pub use error::{FetchError, UpdateFailed};
pub use identity::MeterIdentity;
pub use reconcile::NormalizedRecord;
pub use refresh::{RefreshSettings, RefreshState, WaterMeterCoordinator};
pub use scheduler::MeterScheduler;
