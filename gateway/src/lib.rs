//! Telemetry ingestion gateway.
//!
//! Devices push readings through a gated write path; consumers read the whole
//! feed or resume from a cursor (the `item_id` of the last record they saw).

pub mod clock;
pub mod config;
pub mod errors;
pub mod gate;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod rest;
pub mod store;
pub mod validate;

pub use errors::{Error, Result};
pub use gateway::Gateway;
