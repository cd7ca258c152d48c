//! The control loop bridging connectors
//!
//! A [`Gateway`] owns a set of connectors and an [`EventPoller`] they all signal. Each iteration
//! sleeps until one of them reports incoming data, then moves every available packet from each
//! connector to all of the others.
//!
//! ```no_run
//! use hostbus_connector::{zeromq::{Mode, PubSubConnector}, Gateway};
//!
//! let mut gateway = Gateway::new();
//! gateway.add_connector(PubSubConnector::new("tcp://*:8212", "tcp://*:8211", Mode::PubPull).unwrap());
//! // ... add a CAN connector
//! gateway.run();
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hostbus_common::{Connector, EventPoller, EventSender};

/// How often connectors holding back output are updated when nothing else wakes the gateway
pub const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Forwards packets between connectors
///
/// There is no fairness between connectors beyond the order they were added in. A connector which
/// receives an endless stream of packets can starve the ones added after it.
pub struct Gateway<'a> {
    poller: EventPoller,
    connectors: Vec<Box<dyn Connector + 'a>>,
    idle_timeout: Option<Duration>,
}

impl core::fmt::Debug for Gateway<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gateway")
            .field("poller", &self.poller)
            .field("connectors", &self.connectors.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl Default for Gateway<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Gateway<'a> {
    /// Create a gateway with no connectors
    pub fn new() -> Self {
        Self {
            poller: EventPoller::new(),
            connectors: Vec::new(),
            idle_timeout: None,
        }
    }

    /// Wake up at least this often, even when no connector signals
    ///
    /// Needed when a connector's backend can't signal incoming data, so that it is still polled
    /// periodically.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Add a connector, wiring its read event to the gateway's poller
    ///
    /// Returns the index of the connector, as used in log messages.
    pub fn add_connector(&mut self, mut connector: impl Connector + 'a) -> usize {
        connector.set_read_event(self.poller.event_sender());
        self.connectors.push(Box::new(connector));
        self.connectors.len() - 1
    }

    /// Number of connectors
    pub fn num_connectors(&self) -> usize {
        self.connectors.len()
    }

    /// Create an additional sender for the gateway's poller, e.g. to wake it up for shutdown
    pub fn event_sender(&self) -> EventSender {
        self.poller.event_sender()
    }

    /// Move all available packets between connectors, without waiting
    ///
    /// Every connector is updated in turn, and each of its packets is sent to all other
    /// connectors. Returns the number of packets taken from connectors.
    pub fn forward(&mut self) -> usize {
        let mut count = 0;
        for src in 0..self.connectors.len() {
            self.connectors[src].update();
            while self.connectors[src].is_packet_available() {
                let header = self.connectors[src].packet_header();
                let payload = self.connectors[src].packet_payload();

                for (dst, connector) in self.connectors.iter_mut().enumerate() {
                    if dst != src {
                        log::debug!("{src}->{dst} {header} {} {payload}", payload.len());
                        connector.send_packet(header, payload.clone());
                    }
                }
                self.connectors[src].drop_packet();
                count += 1;
            }
        }
        count
    }

    fn has_pending_output(&self) -> bool {
        self.connectors.iter().any(|c| c.has_pending_output())
    }

    /// Wait for an event, then forward packets
    ///
    /// With an idle timeout configured, packets are forwarded once the timeout expires even if no
    /// event occurred. While a connector holds back output, the wait is cut to [`RETRY_INTERVAL`]
    /// so that its queue keeps draining without incoming traffic.
    pub fn run_once(&mut self) -> usize {
        let timeout = match (self.idle_timeout, self.has_pending_output()) {
            (Some(timeout), true) => Some(timeout.min(RETRY_INTERVAL)),
            (None, true) => Some(RETRY_INTERVAL),
            (timeout, false) => timeout,
        };
        match timeout {
            Some(timeout) => {
                self.poller.wait_for(timeout);
            }
            None => self.poller.wait(),
        }
        self.forward()
    }

    /// Wait at most `timeout` for an event, then forward packets
    ///
    /// The wait is cut to [`RETRY_INTERVAL`] while a connector holds back output.
    pub fn run_once_timeout(&mut self, timeout: Duration) -> usize {
        let timeout = if self.has_pending_output() {
            timeout.min(RETRY_INTERVAL)
        } else {
            timeout
        };
        self.poller.wait_for(timeout);
        self.forward()
    }

    /// Forward packets forever
    pub fn run(&mut self) -> ! {
        log::info!("Gateway running with {} connectors", self.connectors.len());
        loop {
            self.run_once();
        }
    }

    /// Forward packets until `stop` is set
    ///
    /// Setting the flag should be followed by a `send_event` on a sender obtained from
    /// [`event_sender`](Self::event_sender), unless an idle timeout is configured.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        log::info!("Gateway running with {} connectors", self.connectors.len());
        while !stop.load(Ordering::Relaxed) {
            self.run_once();
        }
        log::info!("Gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use assertables::{assert_ge, assert_lt};

    use hostbus_common::{Header, Packet, Payload};

    use super::*;

    /// Connector backed by in-memory queues, recording everything sent to it
    #[derive(Default)]
    struct StubConnector {
        rx: VecDeque<Packet>,
        sent: Rc<RefCell<Vec<Packet>>>,
        updates: Rc<RefCell<usize>>,
        read_event: Rc<RefCell<EventSender>>,
        pending_output: Rc<RefCell<bool>>,
    }

    impl Connector for StubConnector {
        fn update(&mut self) {
            *self.updates.borrow_mut() += 1;
        }

        fn is_packet_available(&self) -> bool {
            !self.rx.is_empty()
        }

        fn packet_header(&self) -> Header {
            self.rx.front().unwrap().header
        }

        fn packet_payload(&self) -> Payload {
            self.rx.front().unwrap().payload.clone()
        }

        fn drop_packet(&mut self) {
            self.rx.pop_front().unwrap();
        }

        fn send_packet(&mut self, header: Header, payload: Payload) {
            self.sent.borrow_mut().push(Packet { header, payload });
        }

        fn set_read_event(&mut self, sender: EventSender) {
            *self.read_event.borrow_mut() = sender;
        }

        fn has_pending_output(&self) -> bool {
            *self.pending_output.borrow()
        }
    }

    fn packet(id: u8) -> Packet {
        Packet::new(Header::new(1, false, 2, 3, id), vec![id, id + 1])
    }

    #[test]
    fn test_forward_to_all_others() {
        let stubs: Vec<StubConnector> = (0..3).map(|_| StubConnector::default()).collect();
        let sent: Vec<_> = stubs.iter().map(|s| s.sent.clone()).collect();
        let updates: Vec<_> = stubs.iter().map(|s| s.updates.clone()).collect();

        let mut gateway = Gateway::new();
        for (i, mut stub) in stubs.into_iter().enumerate() {
            stub.rx.push_back(packet(i as u8));
            gateway.add_connector(stub);
        }

        assert_eq!(3, gateway.forward());
        for (i, sent) in sent.iter().enumerate() {
            let ids: Vec<u8> = sent
                .borrow()
                .iter()
                .map(|p| p.header.packet_identifier)
                .collect();
            let expected: Vec<u8> = (0..3).filter(|&j| j != i as u8).collect();
            assert_eq!(expected, ids);
            assert_eq!(1, *updates[i].borrow());
        }

        // Nothing left
        assert_eq!(0, gateway.forward());
    }

    #[test]
    fn test_connectors_are_wired_to_poller() {
        let stub = StubConnector::default();
        let read_event = stub.read_event.clone();
        let mut gateway = Gateway::new();
        gateway.add_connector(stub);

        let sender = read_event.borrow().clone();
        assert!(sender.is_valid());
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sender.send_event();
        });
        assert_eq!(0, gateway.run_once_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_pending_output_keeps_connectors_updated() {
        let stub = StubConnector::default();
        let updates = stub.updates.clone();
        let pending_output = stub.pending_output.clone();
        // No idle timeout, so only pending output can end the wait
        let mut gateway = Gateway::new();
        gateway.add_connector(stub);

        *pending_output.borrow_mut() = true;
        let start = Instant::now();
        for _ in 0..3 {
            gateway.run_once();
        }
        assert_lt!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(3, *updates.borrow());

        *pending_output.borrow_mut() = false;
        let start = Instant::now();
        gateway.run_once_timeout(Duration::from_millis(50));
        assert_ge!(start.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn test_run_until_stops() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut gateway = Gateway::new().with_idle_timeout(Duration::from_millis(10));
        gateway.add_connector(StubConnector::default());

        let stop_clone = stop.clone();
        let sender = gateway.event_sender();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stop_clone.store(true, Ordering::Relaxed);
            sender.send_event();
        });
        gateway.run_until(&stop);
        handle.join().unwrap();
    }

    #[test]
    fn test_payload_is_shared_not_copied() {
        let mut src = StubConnector::default();
        let original = packet(7);
        src.rx.push_back(original.clone());
        let dst = StubConnector::default();
        let sent = dst.sent.clone();

        let mut gateway = Gateway::new();
        gateway.add_connector(src);
        gateway.add_connector(dst);
        gateway.forward();

        let sent = sent.borrow();
        assert_eq!(original, sent[0]);
        assert_eq!(original.payload.as_ptr(), sent[0].payload.as_ptr());
    }
}
