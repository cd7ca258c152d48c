use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use hostbus_common::{Connector, EventSender, Header, Packet, Payload};

#[derive(Default)]
struct StubState {
    rx: VecDeque<Packet>,
    sent: Vec<Packet>,
    read_event: EventSender,
}

/// A connector backed by in-memory queues
///
/// Packets are injected and inspected through a [`StubHandle`], which may live on another thread.
pub struct StubConnector {
    state: Arc<Mutex<StubState>>,
}

/// Test side of a [`StubConnector`]
#[derive(Clone)]
pub struct StubHandle {
    state: Arc<Mutex<StubState>>,
}

pub fn stub_connector() -> (StubConnector, StubHandle) {
    let state = Arc::new(Mutex::new(StubState::default()));
    (
        StubConnector {
            state: state.clone(),
        },
        StubHandle { state },
    )
}

impl StubConnector {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }
}

impl StubHandle {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }

    /// Make a packet available on the connector, and signal its read event
    pub fn inject(&self, packet: Packet) {
        let event = {
            let mut state = self.lock();
            state.rx.push_back(packet);
            state.read_event.clone()
        };
        event.send_event();
    }

    /// Packets passed to `send_packet`
    pub fn sent(&self) -> Vec<Packet> {
        self.lock().sent.clone()
    }

    /// Number of injected packets not yet consumed
    pub fn queued(&self) -> usize {
        self.lock().rx.len()
    }
}

impl Connector for StubConnector {
    fn update(&mut self) {}

    fn is_packet_available(&self) -> bool {
        !self.lock().rx.is_empty()
    }

    fn packet_header(&self) -> Header {
        self.lock().rx.front().unwrap().header
    }

    fn packet_payload(&self) -> Payload {
        self.lock().rx.front().unwrap().payload.clone()
    }

    fn drop_packet(&mut self) {
        self.lock().rx.pop_front().unwrap();
    }

    fn send_packet(&mut self, header: Header, payload: Payload) {
        self.lock().sent.push(Packet { header, payload });
    }

    fn set_read_event(&mut self, sender: EventSender) {
        self.lock().read_event = sender;
    }
}
