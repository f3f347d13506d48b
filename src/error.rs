//! Errors that end the process.
//!
//! Everything below the supervisor is logged and retried; only startup
//! failures and explicit one-shot commands surface here.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("unknown device: {_0}")]
    UnknownDevice(#[error(not(source))] String),
    /// The hot tier is missing or not a distinct mount; producers must not start
    #[display("device {_0}: RAM tier is not usable")]
    HotTier(#[error(not(source))] String),
    #[display("device {_0}: failed to provision RAM tier")]
    Provision(#[error(not(source))] String),
    #[display("device {_0}: cold tier layout could not be created")]
    Layout(#[error(not(source))] String),
    #[display("failed to write output")]
    Output,
}
