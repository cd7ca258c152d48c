//! Test harness for exercising connectors and the gateway together
pub mod sim_bus;
pub mod stub;

use std::time::{Duration, Instant};

use hostbus_common::{Connector, Packet};
use hostbus_connector::Gateway;

/// Run the gateway until `done` returns true, panicking after `timeout`
pub fn run_gateway_until(gateway: &mut Gateway, timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(
            start.elapsed() < timeout,
            "Condition not reached within {timeout:?}"
        );
        gateway.run_once_timeout(Duration::from_millis(10));
    }
}

/// Collect packets from a connector until `count` have arrived, panicking after `timeout`
pub fn collect_packets(
    connector: &mut impl Connector,
    count: usize,
    timeout: Duration,
) -> Vec<Packet> {
    let start = Instant::now();
    let mut packets = Vec::new();
    while packets.len() < count {
        assert!(
            start.elapsed() < timeout,
            "Received {} of {count} packets within {timeout:?}",
            packets.len()
        );
        connector.update();
        match connector.take_packet() {
            Some(packet) => packets.push(packet),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    packets
}
