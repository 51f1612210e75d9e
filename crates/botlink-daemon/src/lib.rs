//! Botlink daemon library: configuration loading and the event pump.
//!
//! The binary reads a [`DaemonConfig`], hands it to a
//! [`botlink_connector::Launcher`] and logs every event the connectors
//! deliver until interrupted.

pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use server::{run, run_until};
