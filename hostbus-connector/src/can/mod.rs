//! Connector for CAN bus drivers
//!
//! The [`BusConnector`] translates between packets and the frames of a [`CanSender`] +
//! [`CanReceiver`] driver. Unlike the pub/sub connector there is no reader thread; the driver is
//! polled from [`Connector::update`] on the gateway thread, and frames are reassembled into packets
//! right there.
use std::collections::VecDeque;

use hostbus_common::{
    traits::{CanReceiver, CanSendError, CanSender},
    CanMessage, Connector, EventSender, Header, OverflowPolicy, Packet, PacketQueue, Payload,
    DEFAULT_MAX_QUEUE_SIZE,
};

pub mod frame;

use frame::Reassembler;

/// Tuning of a [`BusConnector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConnectorConfig {
    /// Capacity of the received packet queue
    pub max_queue_size: usize,
    /// Policy applied when the received packet queue is full
    pub overflow_policy: OverflowPolicy,
    /// Capacity of the queue of frames waiting for the driver
    pub max_tx_frames: usize,
    /// Maximum number of partially received packets
    pub max_pending_reassemblies: usize,
}

impl Default for BusConnectorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            overflow_policy: OverflowPolicy::default(),
            max_tx_frames: DEFAULT_MAX_QUEUE_SIZE,
            max_pending_reassemblies: frame::DEFAULT_MAX_PENDING,
        }
    }
}

/// A [`Connector`] exchanging packets over a CAN bus driver
#[derive(Debug)]
pub struct BusConnector<D> {
    driver: D,
    rx_queue: PacketQueue,
    tx_queue: VecDeque<CanMessage>,
    max_tx_frames: usize,
    reassembler: Reassembler,
    counter: u8,
}

impl<D> BusConnector<D>
where
    D: CanSender + CanReceiver,
{
    /// Create a connector with default configuration
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, BusConnectorConfig::default())
    }

    /// Create a connector
    pub fn with_config(driver: D, config: BusConnectorConfig) -> Self {
        Self {
            driver,
            rx_queue: PacketQueue::new(config.max_queue_size, config.overflow_policy),
            tx_queue: VecDeque::new(),
            max_tx_frames: config.max_tx_frames.max(1),
            reassembler: Reassembler::new(config.max_pending_reassemblies),
            counter: 0,
        }
    }

    /// Access the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Consume the connector, returning the driver
    pub fn into_inner(self) -> D {
        self.driver
    }

    /// Number of received packets waiting to be read
    pub fn queued_packets(&self) -> usize {
        self.rx_queue.len()
    }

    /// Number of frames waiting for the driver to accept them
    pub fn pending_tx_frames(&self) -> usize {
        self.tx_queue.len()
    }

    /// Number of received packets dropped because the queue was full
    pub fn dropped_packets(&self) -> u64 {
        self.rx_queue.dropped()
    }

    fn poll_driver(&mut self) {
        loop {
            match self.driver.try_recv() {
                Ok(Some(msg)) => {
                    if let Some(packet) = self.reassembler.handle_frame(&msg) {
                        self.rx_queue.push(packet);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Error reading from CAN driver: {e}");
                    break;
                }
            }
        }
    }

    fn flush(&mut self) {
        while let Some(msg) = self.tx_queue.pop_front() {
            if let Err(CanSendError(msg)) = self.driver.send(msg) {
                // Driver is busy, retry on the next update. Stopping at the first refusal bounds
                // the time a driver with a write timeout can hold up the caller.
                self.tx_queue.push_front(msg);
                break;
            }
        }
    }

    fn front(&self) -> &Packet {
        self.rx_queue
            .front()
            .expect("No packet available on the CAN connector")
    }
}

impl<D> Connector for BusConnector<D>
where
    D: CanSender + CanReceiver,
{
    fn update(&mut self) {
        self.poll_driver();
        self.flush();
    }

    fn is_packet_available(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    fn packet_header(&self) -> Header {
        self.front().header
    }

    fn packet_payload(&self) -> Payload {
        self.front().payload.clone()
    }

    fn drop_packet(&mut self) {
        if self.rx_queue.pop().is_none() {
            panic!("Dropping packet while none is available on the CAN connector");
        }
    }

    fn send_packet(&mut self, header: Header, payload: Payload) {
        let frames = match frame::fragment(&header, &payload, self.counter) {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("Discarding {header} for CAN bus: {e}");
                return;
            }
        };
        if frames.len() > 1 {
            self.counter = (self.counter + 1) & 0x0f;
        }

        if self.tx_queue.len() + frames.len() > self.max_tx_frames {
            log::warn!(
                "CAN transmit queue full ({} frames), discarding {header}",
                self.tx_queue.len()
            );
            return;
        }
        self.tx_queue.extend(frames);
        self.flush();
    }

    fn set_read_event(&mut self, sender: EventSender) {
        self.driver.set_read_event(sender);
    }

    fn has_pending_output(&self) -> bool {
        !self.tx_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use hostbus_common::CanId;

    use super::*;

    #[derive(Debug, Default)]
    struct MockDriver {
        rx: VecDeque<CanMessage>,
        sent: Vec<CanMessage>,
        /// Number of frames the driver accepts before reporting busy
        capacity: Option<usize>,
        attempts: usize,
    }

    impl CanSender for MockDriver {
        fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
            self.attempts += 1;
            match &mut self.capacity {
                Some(0) => Err(CanSendError(msg)),
                Some(n) => {
                    *n -= 1;
                    self.sent.push(msg);
                    Ok(())
                }
                None => {
                    self.sent.push(msg);
                    Ok(())
                }
            }
        }
    }

    impl CanReceiver for MockDriver {
        type Error = Infallible;

        fn try_recv(&mut self) -> Result<Option<CanMessage>, Self::Error> {
            Ok(self.rx.pop_front())
        }
    }

    fn frame(header: Header, data: &[u8]) -> CanMessage {
        CanMessage::new(
            CanId::extended(frame::encode_identifier(&header, false).unwrap()),
            data,
        )
    }

    #[test]
    fn test_receive_packets() {
        let mut driver = MockDriver::default();
        for i in 0..3 {
            driver.rx.push_back(frame(Header::new(0, false, 1, 2, i), &[i]));
        }
        let mut connector = BusConnector::new(driver);
        assert!(!connector.is_packet_available());

        connector.update();
        for i in 0..3 {
            assert!(connector.is_packet_available());
            assert_eq!(i, connector.packet_header().packet_identifier);
            assert_eq!(&[i], connector.packet_payload().as_slice());
            connector.drop_packet();
        }
        assert!(!connector.is_packet_available());
        assert_eq!(0, connector.queued_packets());
    }

    #[test]
    fn test_send_fragmented() {
        let mut connector = BusConnector::new(MockDriver::default());
        let header = Header::new(1, false, 3, 4, 5);
        let payload = Payload::from((0..30).collect::<Vec<u8>>());
        connector.send_packet(header, payload.clone());
        connector.send_packet(header, payload.clone());

        let sent = &connector.driver().sent;
        assert_eq!(10, sent.len());
        // Consecutive packets use different message counters
        assert_eq!(0x00, sent[0].data[0]);
        assert_eq!(0x10, sent[5].data[0]);

        let mut reassembler = Reassembler::default();
        let packets: Vec<_> = sent
            .iter()
            .filter_map(|f| reassembler.handle_frame(f))
            .collect();
        assert_eq!(2, packets.len());
        assert_eq!(payload, packets[0].payload);
        assert_eq!(header, packets[1].header);
    }

    #[test]
    fn test_busy_driver_retries_on_update() {
        let driver = MockDriver {
            capacity: Some(1),
            ..Default::default()
        };
        let mut connector = BusConnector::new(driver);
        connector.send_packet(Header::new(0, false, 1, 1, 1), Payload::from([1]));
        connector.send_packet(Header::new(0, false, 1, 1, 2), Payload::from([2]));
        assert_eq!(1, connector.driver().sent.len());
        assert_eq!(1, connector.pending_tx_frames());

        connector.driver_mut().capacity = Some(10);
        connector.update();
        assert_eq!(0, connector.pending_tx_frames());
        let sent = &connector.driver().sent;
        assert_eq!(&[1], sent[0].data());
        assert_eq!(&[2], sent[1].data());
    }

    #[test]
    fn test_pending_output_until_driver_accepts() {
        let driver = MockDriver {
            capacity: Some(0),
            ..Default::default()
        };
        let mut connector = BusConnector::new(driver);
        assert!(!connector.has_pending_output());

        connector.send_packet(Header::new(0, false, 1, 1, 1), Payload::from([0; 30]));
        assert!(connector.has_pending_output());
        assert_eq!(5, connector.pending_tx_frames());
        // A refusing driver is asked once per flush, not once per queued frame
        assert_eq!(1, connector.driver().attempts);
        connector.update();
        assert_eq!(2, connector.driver().attempts);

        connector.driver_mut().capacity = None;
        connector.update();
        assert!(!connector.has_pending_output());
        assert_eq!(5, connector.driver().sent.len());
    }

    #[test]
    fn test_full_tx_queue_discards_whole_packet() {
        let driver = MockDriver {
            capacity: Some(0),
            ..Default::default()
        };
        let config = BusConnectorConfig {
            max_tx_frames: 4,
            ..Default::default()
        };
        let mut connector = BusConnector::with_config(driver, config);
        connector.send_packet(Header::default(), Payload::from([0; 18]));
        assert_eq!(3, connector.pending_tx_frames());
        // Needs another 3 frames, which don't fit
        connector.send_packet(Header::default(), Payload::from([0; 18]));
        assert_eq!(3, connector.pending_tx_frames());
        connector.send_packet(Header::default(), Payload::from([0; 2]));
        assert_eq!(4, connector.pending_tx_frames());
    }

    #[test]
    fn test_unencodable_packet_is_discarded() {
        let mut connector = BusConnector::new(MockDriver::default());
        connector.send_packet(Header::new(7, false, 0, 0, 0), Payload::empty());
        connector.send_packet(Header::default(), Payload::from(vec![0; 200]));
        assert!(connector.driver().sent.is_empty());
        assert_eq!(0, connector.pending_tx_frames());
    }

    #[test]
    fn test_take_packet() {
        let mut driver = MockDriver::default();
        driver.rx.push_back(frame(Header::new(2, true, 1, 2, 3), &[4, 5]));
        let mut connector = BusConnector::new(driver);
        assert!(connector.take_packet().is_none());
        connector.update();
        let packet = connector.take_packet().unwrap();
        assert_eq!(Header::new(2, true, 1, 2, 3), packet.header);
        assert!(connector.take_packet().is_none());
    }

    #[test]
    #[should_panic]
    fn test_header_without_packet_panics() {
        let connector = BusConnector::new(MockDriver::default());
        connector.packet_header();
    }

    #[test]
    #[should_panic]
    fn test_drop_without_packet_panics() {
        let mut connector = BusConnector::new(MockDriver::default());
        connector.drop_packet();
    }
}
