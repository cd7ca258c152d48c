//! Command-line utilities for hostbus
//!
//! # hostbus-gateway
//!
//! Bridges a socketcan interface and a pair of ZeroMQ endpoints, forwarding every packet received on
//! one side to the other. Settings come from an optional TOML file (see [`config`]), and command
//! line flags override them.
//!
//! Usage example: `hostbus-gateway --config gateway.toml --interface can0`
//!
//! # hostbus-dump
//!
//! Connects to a running gateway as a client, and prints each packet it publishes to stdout.
//!
//! Usage example: `hostbus-dump tcp://localhost:8211 tcp://localhost:8212`
pub mod config;

pub use config::{ConfigError, GatewayConfig};
