//! Configuration for the capture storage service.
//!
//! Every size, count, window and interval is a named value here; nothing in
//! the other crates hard-codes a retention policy.

pub mod error;
mod load;
mod models;
mod serde_ext;

pub use crate::load::{CONFIG_ENV, ENV_PREFIX, SYSTEM_CONFIG};
pub use crate::models::{
    ArchiveConfig, Config, DeviceConfig, HealthConfig, PerContentType, ServiceConfig, SweepConfig,
};
