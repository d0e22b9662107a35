//! stratum-cli library root.
//!
//! Re-exports internal modules so that integration tests can exercise
//! config loading and rendering without going through the binary.

pub mod aws;
pub mod cli;
pub mod commands;
pub mod config;
pub mod render;
