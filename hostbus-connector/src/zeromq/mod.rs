//! Connector for ZeroMQ pub/sub transports
//!
//! Packets travel as one ZeroMQ message each, encoded with [`hostbus_common::wire`]. Inbound
//! messages are received by a [`Reader`] thread; outbound messages are sent from the caller's
//! thread without blocking.
//!
//! Two socket arrangements are supported, see [`Mode`]. A typical setup runs a gateway in
//! [`Mode::PubPull`] and any number of clients in [`Mode::SubPush`]:
//!
//! ```no_run
//! use hostbus_connector::zeromq::{Mode, PubSubConnector};
//!
//! // Gateway side
//! let gateway = PubSubConnector::new("tcp://*:8212", "tcp://*:8211", Mode::PubPull).unwrap();
//! // Client side
//! let client =
//!     PubSubConnector::new("tcp://localhost:8211", "tcp://localhost:8212", Mode::SubPush).unwrap();
//! ```
use std::time::Duration;

use hostbus_common::{
    wire, Connector, EventSender, Header, OverflowPolicy, Packet, PacketQueue, Payload,
    DEFAULT_MAX_QUEUE_SIZE,
};
use snafu::{ResultExt, Snafu};

mod reader;

pub use reader::{Reader, DEFAULT_POLL_TIMEOUT};

/// Socket arrangement of a [`PubSubConnector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Client role: connect a SUB socket to the inbound endpoint and a PUSH socket to the outbound
    /// endpoint
    SubPush,
    /// Server role: bind a PULL socket on the inbound endpoint and a PUB socket on the outbound
    /// endpoint
    PubPull,
}

/// Error returned when a connector can't be set up
#[derive(Debug, Snafu)]
pub enum PubSubError {
    /// Creating or configuring a socket failed
    #[snafu(display("Failed to create ZeroMQ socket: {source}"))]
    Socket {
        /// Underlying error
        source: zmq::Error,
    },
    /// Binding or connecting the inbound socket failed
    #[snafu(display("Failed to open inbound endpoint {endpoint}: {source}"))]
    Inbound {
        /// The endpoint
        endpoint: String,
        /// Underlying error
        source: zmq::Error,
    },
    /// Binding or connecting the outbound socket failed
    #[snafu(display("Failed to open outbound endpoint {endpoint}: {source}"))]
    Outbound {
        /// The endpoint
        endpoint: String,
        /// Underlying error
        source: zmq::Error,
    },
    /// The reader thread could not be started
    #[snafu(display("Failed to spawn reader thread: {source}"))]
    Spawn {
        /// Underlying error
        source: std::io::Error,
    },
}

/// Configuration of a [`PubSubConnector`]
#[derive(Clone)]
pub struct PubSubConfig {
    /// Endpoint packets are received from
    pub endpoint_in: String,
    /// Endpoint packets are sent to
    pub endpoint_out: String,
    /// Socket arrangement
    pub mode: Mode,
    /// Capacity of the received packet queue
    pub max_queue_size: usize,
    /// Policy applied when the received packet queue is full
    pub overflow_policy: OverflowPolicy,
    /// Interval at which the reader thread checks for a stop request
    pub poll_timeout: Duration,
    /// How long unsent outbound messages are kept once the connector is dropped
    pub linger: Duration,
    /// Context to create the sockets in. A new context is created if None.
    ///
    /// Sharing a context is required for `inproc://` endpoints.
    pub context: Option<zmq::Context>,
}

impl core::fmt::Debug for PubSubConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PubSubConfig")
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .field("mode", &self.mode)
            .field("max_queue_size", &self.max_queue_size)
            .field("overflow_policy", &self.overflow_policy)
            .field("poll_timeout", &self.poll_timeout)
            .field("linger", &self.linger)
            .field("shared_context", &self.context.is_some())
            .finish()
    }
}

impl PubSubConfig {
    /// Create a configuration with default queue and timing settings
    pub fn new(endpoint_in: impl Into<String>, endpoint_out: impl Into<String>, mode: Mode) -> Self {
        Self {
            endpoint_in: endpoint_in.into(),
            endpoint_out: endpoint_out.into(),
            mode,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            overflow_policy: OverflowPolicy::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            linger: Duration::ZERO,
            context: None,
        }
    }
}

/// A [`Connector`] exchanging packets over ZeroMQ sockets
pub struct PubSubConnector {
    // Field order matters: the reader (and its socket) must go before the context
    reader: Reader,
    socket_out: zmq::Socket,
    context: zmq::Context,
}

impl core::fmt::Debug for PubSubConnector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PubSubConnector")
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

impl PubSubConnector {
    /// Open a connector with default settings
    pub fn new(endpoint_in: &str, endpoint_out: &str, mode: Mode) -> Result<Self, PubSubError> {
        Self::with_config(PubSubConfig::new(endpoint_in, endpoint_out, mode))
    }

    /// Open a connector
    ///
    /// Binds or connects both sockets according to the mode, and starts the reader thread.
    pub fn with_config(config: PubSubConfig) -> Result<Self, PubSubError> {
        let context = config.context.clone().unwrap_or_else(zmq::Context::new);
        let linger = config.linger.as_millis().min(i32::MAX as u128) as i32;

        let (in_type, out_type) = match config.mode {
            Mode::SubPush => (zmq::SUB, zmq::PUSH),
            Mode::PubPull => (zmq::PULL, zmq::PUB),
        };
        let socket_in = context.socket(in_type).context(SocketSnafu)?;
        let socket_out = context.socket(out_type).context(SocketSnafu)?;
        socket_in.set_linger(linger).context(SocketSnafu)?;
        socket_out.set_linger(linger).context(SocketSnafu)?;

        let endpoint_in = config.endpoint_in.as_str();
        let endpoint_out = config.endpoint_out.as_str();
        match config.mode {
            Mode::SubPush => {
                socket_in
                    .connect(endpoint_in)
                    .context(InboundSnafu { endpoint: endpoint_in })?;
                socket_in.set_subscribe(b"").context(SocketSnafu)?;
                socket_out
                    .connect(endpoint_out)
                    .context(OutboundSnafu { endpoint: endpoint_out })?;
            }
            Mode::PubPull => {
                socket_in
                    .bind(endpoint_in)
                    .context(InboundSnafu { endpoint: endpoint_in })?;
                socket_out
                    .bind(endpoint_out)
                    .context(OutboundSnafu { endpoint: endpoint_out })?;
            }
        }
        log::info!(
            "ZeroMQ connector {:?} in: {endpoint_in}, out: {endpoint_out}",
            config.mode
        );

        let queue = PacketQueue::new(config.max_queue_size, config.overflow_policy);
        let reader = Reader::spawn(socket_in, queue, config.poll_timeout).context(SpawnSnafu)?;

        Ok(Self {
            reader,
            socket_out,
            context,
        })
    }

    /// The context the sockets were created in
    pub fn context(&self) -> &zmq::Context {
        &self.context
    }

    /// Access the reader
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    fn front(&self) -> Packet {
        self.reader
            .front()
            .expect("No packet available on the ZeroMQ connector")
    }
}

impl Connector for PubSubConnector {
    fn update(&mut self) {
        // The reader thread pushes directly into the queue
    }

    fn is_packet_available(&self) -> bool {
        self.reader.is_packet_available()
    }

    fn packet_header(&self) -> Header {
        self.front().header
    }

    fn packet_payload(&self) -> Payload {
        self.front().payload
    }

    fn drop_packet(&mut self) {
        if self.reader.pop().is_none() {
            panic!("Dropping packet while none is available on the ZeroMQ connector");
        }
    }

    fn send_packet(&mut self, header: Header, payload: Payload) {
        let msg = wire::encode(&header, &payload);
        match self.socket_out.send(msg, zmq::DONTWAIT) {
            Ok(()) => (),
            Err(zmq::Error::EAGAIN) => log::debug!("ZeroMQ send would block, discarding {header}"),
            Err(e) => log::warn!("ZeroMQ send failed, discarding {header}: {e}"),
        }
    }

    fn set_read_event(&mut self, sender: EventSender) {
        self.reader.set_read_event(sender);
    }

    fn take_packet(&mut self) -> Option<Packet> {
        // Single lock instead of the three accessor calls
        self.reader.pop()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use assertables::assert_lt;
    use hostbus_common::EventPoller;

    use super::*;

    fn inproc_config(ctx: &zmq::Context, name: &str, mode: Mode) -> PubSubConfig {
        let mut config = PubSubConfig::new(
            format!("inproc://{name}-in"),
            format!("inproc://{name}-out"),
            mode,
        );
        config.context = Some(ctx.clone());
        config
    }

    fn wait_for_packets(connector: &PubSubConnector, count: usize) {
        let start = Instant::now();
        while connector.reader().queued_packets() < count {
            assert_lt!(start.elapsed(), Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_pull_receives_packets() {
        let ctx = zmq::Context::new();
        let mut connector =
            PubSubConnector::with_config(inproc_config(&ctx, "pull", Mode::PubPull)).unwrap();
        let poller = EventPoller::new();
        connector.set_read_event(poller.event_sender());

        let push = ctx.socket(zmq::PUSH).unwrap();
        push.connect("inproc://pull-in").unwrap();
        for i in 0..3u8 {
            push.send(wire::encode(&Header::new(1, false, 2, 3, i), &[i; 4]), 0)
                .unwrap();
        }
        // Malformed messages are skipped
        push.send(&[1u8, 2][..], 0).unwrap();

        assert!(poller.wait_for(Duration::from_secs(5)));
        wait_for_packets(&connector, 3);

        for i in 0..3u8 {
            assert!(connector.is_packet_available());
            assert_eq!(Header::new(1, false, 2, 3, i), connector.packet_header());
            assert_eq!(&[i; 4], connector.packet_payload().as_slice());
            connector.drop_packet();
        }
        assert!(!connector.is_packet_available());
    }

    #[test]
    fn test_pub_sends_packets() {
        let ctx = zmq::Context::new();
        let mut connector =
            PubSubConnector::with_config(inproc_config(&ctx, "pub", Mode::PubPull)).unwrap();

        let sub = ctx.socket(zmq::SUB).unwrap();
        sub.connect("inproc://pub-out").unwrap();
        sub.set_subscribe(b"").unwrap();

        // Subscriptions propagate asynchronously, so publish until one arrives
        let header = Header::new(3, false, 7, 2, 42);
        let start = Instant::now();
        let msg = loop {
            assert_lt!(start.elapsed(), Duration::from_secs(5));
            connector.send_packet(header, Payload::from([0xAA, 0xBB, 0xCC]));
            if sub.poll(zmq::POLLIN, 10).unwrap() > 0 {
                break sub.recv_bytes(0).unwrap();
            }
        };
        assert_eq!(vec![3, 0, 7, 2, 42, 0xAA, 0xBB, 0xCC], msg);
    }

    #[test]
    fn test_packets_queued_before_registration_are_announced() {
        let ctx = zmq::Context::new();
        let mut connector =
            PubSubConnector::with_config(inproc_config(&ctx, "backlog", Mode::PubPull)).unwrap();

        let push = ctx.socket(zmq::PUSH).unwrap();
        push.connect("inproc://backlog-in").unwrap();
        push.send(wire::encode(&Header::new(0, false, 1, 2, 3), &[4]), 0)
            .unwrap();
        wait_for_packets(&connector, 1);

        let poller = EventPoller::new();
        connector.set_read_event(poller.event_sender());
        assert!(poller.has_event_occurred());
        assert_eq!(3, connector.packet_header().packet_identifier);
    }

    #[test]
    fn test_no_event_for_empty_queue() {
        let ctx = zmq::Context::new();
        let mut connector =
            PubSubConnector::with_config(inproc_config(&ctx, "idle", Mode::PubPull)).unwrap();
        let poller = EventPoller::new();
        connector.set_read_event(poller.event_sender());
        assert!(!poller.has_event_occurred());
    }

    #[test]
    fn test_queue_overflow_drops_newest() {
        let ctx = zmq::Context::new();
        let mut config = inproc_config(&ctx, "overflow", Mode::PubPull);
        config.max_queue_size = 2;
        let connector = PubSubConnector::with_config(config).unwrap();

        let push = ctx.socket(zmq::PUSH).unwrap();
        push.connect("inproc://overflow-in").unwrap();
        for i in 0..5u8 {
            push.send(wire::encode(&Header::new(0, false, 0, 0, i), &[]), 0)
                .unwrap();
        }

        let start = Instant::now();
        while connector.reader().dropped_packets() < 3 {
            assert_lt!(start.elapsed(), Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(2, connector.reader().queued_packets());
        assert_eq!(0, connector.packet_header().packet_identifier);
    }

    #[test]
    fn test_drop_stops_reader_promptly() {
        let ctx = zmq::Context::new();
        let connector =
            PubSubConnector::with_config(inproc_config(&ctx, "stop", Mode::PubPull)).unwrap();
        assert!(connector.reader().is_running());

        let start = Instant::now();
        drop(connector);
        assert_lt!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let result = PubSubConnector::new("bogus://nowhere", "inproc://x", Mode::PubPull);
        assert!(matches!(result, Err(PubSubError::Inbound { .. })));
    }
}
