//! Transport connectors for hostbus packets, and a gateway bridging them
//!
//! The crate provides:
//!
//! - A [BusConnector] which carries packets over any CAN driver implementing the
//!   [`CanSender`](common::traits::CanSender) and [`CanReceiver`](common::traits::CanReceiver)
//!   traits, fragmenting packets which don't fit in a single frame
//! - A [PubSubConnector] which carries packets over ZeroMQ sockets, in either the server or the
//!   client role
//! - A [Gateway] which forwards every packet received on one connector to all of the others
//! - A socketcan driver for Linux, behind the `socketcan` feature
#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod can;
mod gateway;
#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub mod socketcan;
pub mod zeromq;
pub use hostbus_common as common;

pub use can::{BusConnector, BusConnectorConfig};
pub use gateway::{Gateway, RETRY_INTERVAL};
pub use zeromq::{Mode, PubSubConfig, PubSubConnector, PubSubError};
