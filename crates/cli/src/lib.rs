//! Command-line front end for topic discovery.
//!
//! Provides commands for:
//! - Running a discovery node (centralized, ring member, or failover)
//! - Hosting the coordination service failover nodes elect through
//! - Probing a running service as a publisher, subscriber or broker would
//! - Inspecting ring placement offline

pub mod commands;
pub mod config;
pub mod logging;

pub use commands::Command;
pub use config::CliConfig;
