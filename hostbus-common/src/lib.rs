//! Common functionality shared among other hostbus crates.
//!
//! This holds the transport independent pieces of the stack: the [`Packet`] model, the byte level
//! wire codec used on pub/sub transports, the bounded [`PacketQueue`], the cross thread
//! [`EventPoller`], and the traits every transport backend implements.
//!
//! Most users will want `hostbus-connector`, which re-exports this crate as `common`.
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod event_poller;
pub mod messages;
pub mod packet;
pub mod queue;
pub mod traits;
pub mod wire;

pub use event_poller::{EventPoller, EventSender};
pub use messages::{CanId, CanMessage};
pub use packet::{Header, Packet, Payload};
pub use queue::{OverflowPolicy, PacketQueue, PushOutcome, DEFAULT_MAX_QUEUE_SIZE};
pub use traits::Connector;
