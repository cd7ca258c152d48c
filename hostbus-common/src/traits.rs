//! Common traits

use std::error;

use crate::event_poller::EventSender;
use crate::messages::CanMessage;
use crate::packet::{Header, Packet, Payload};

/// Error type for CAN send operations containing the failed message
///
/// Returned when the driver can't accept the frame right now, e.g. because its transmit buffer is
/// full. The frame is handed back so that it can be retried.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct CanSendError(pub CanMessage);

impl core::fmt::Display for CanSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to send CAN message: {:?}", self.0)
    }
}

impl error::Error for CanSendError {}

/// A non-blocking CAN frame sender
pub trait CanSender {
    /// Hand a frame to the driver for transmission
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError>;
}

/// A non-blocking CAN frame receiver
pub trait CanReceiver {
    /// The error type returned by try_recv
    type Error: error::Error;

    /// Attempt to read a frame from the receiver, and return `Ok(None)` immediately if no frame is
    /// available
    fn try_recv(&mut self) -> Result<Option<CanMessage>, Self::Error>;

    /// Register a sender to be notified whenever new frames arrive
    ///
    /// Drivers which can't notify leave this as a no-op, in which case the owner has to poll them.
    fn set_read_event(&mut self, _sender: EventSender) {}

    /// Remove any pending frames from the receiver
    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.try_recv()?.is_some() {}
        Ok(())
    }
}

/// A transport backend exchanging packets with a gateway
///
/// All methods are called from the single thread owning the connector, and none of them block.
///
/// The accessors [`packet_header`](Self::packet_header), [`packet_payload`](Self::packet_payload)
/// and [`drop_packet`](Self::drop_packet) operate on the packet at the front of the connector's
/// receive queue. Calling them while [`is_packet_available`](Self::is_packet_available) returns
/// false is a programming error, and panics.
pub trait Connector {
    /// Perform any I/O or bookkeeping needed to make newly arrived packets available
    fn update(&mut self);

    /// Returns true if at least one received packet is queued
    fn is_packet_available(&self) -> bool;

    /// Header of the packet at the front of the queue
    fn packet_header(&self) -> Header;

    /// Payload of the packet at the front of the queue
    fn packet_payload(&self) -> Payload;

    /// Remove the packet at the front of the queue
    fn drop_packet(&mut self);

    /// Queue a packet for transmission
    ///
    /// Delivery is best effort: if the backend is saturated, the packet is discarded.
    fn send_packet(&mut self, header: Header, payload: Payload);

    /// Register a sender to be notified whenever a packet arrives
    fn set_read_event(&mut self, sender: EventSender);

    /// Returns true while sent packets are held back, waiting for the backend to accept them
    ///
    /// Such a connector only makes progress in [`update`](Self::update), so its owner has to keep
    /// calling it even when no read event arrives.
    fn has_pending_output(&self) -> bool {
        false
    }

    /// Remove and return the packet at the front of the queue, if any
    fn take_packet(&mut self) -> Option<Packet> {
        if !self.is_packet_available() {
            return None;
        }
        let packet = Packet {
            header: self.packet_header(),
            payload: self.packet_payload(),
        };
        self.drop_packet();
        Some(packet)
    }
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn update(&mut self) {
        (**self).update()
    }

    fn is_packet_available(&self) -> bool {
        (**self).is_packet_available()
    }

    fn packet_header(&self) -> Header {
        (**self).packet_header()
    }

    fn packet_payload(&self) -> Payload {
        (**self).packet_payload()
    }

    fn drop_packet(&mut self) {
        (**self).drop_packet()
    }

    fn send_packet(&mut self, header: Header, payload: Payload) {
        (**self).send_packet(header, payload)
    }

    fn set_read_event(&mut self, sender: EventSender) {
        (**self).set_read_event(sender)
    }

    fn has_pending_output(&self) -> bool {
        (**self).has_pending_output()
    }

    fn take_packet(&mut self) -> Option<Packet> {
        (**self).take_packet()
    }
}
