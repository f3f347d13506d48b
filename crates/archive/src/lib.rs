pub mod archive;
mod context;
pub mod error;
pub mod health;
mod heartbeat;
pub mod sweep;

pub use crate::context::{Context, Device};
