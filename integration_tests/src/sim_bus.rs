use std::{
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard},
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use hostbus_common::{
    traits::{CanReceiver, CanSendError, CanSender},
    CanMessage, EventSender,
};

struct Port {
    id: usize,
    tx: Sender<CanMessage>,
    read_event: EventSender,
}

type PortList = Arc<Mutex<Vec<Port>>>;

/// An in-memory CAN bus
///
/// Every frame sent by one driver is delivered to all other drivers on the bus, in order.
#[derive(Clone, Default)]
pub struct SimBus {
    ports: PortList,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new driver to the bus
    pub fn new_driver(&self) -> SimBusDriver {
        let (tx, rx) = unbounded();
        let mut ports = lock(&self.ports);
        let id = ports.len();
        ports.push(Port {
            id,
            tx,
            read_event: EventSender::default(),
        });
        SimBusDriver {
            id,
            ports: self.ports.clone(),
            rx,
        }
    }
}

fn lock(ports: &PortList) -> MutexGuard<'_, Vec<Port>> {
    ports.lock().unwrap()
}

/// One node's connection to a [`SimBus`]
pub struct SimBusDriver {
    id: usize,
    ports: PortList,
    rx: Receiver<CanMessage>,
}

impl SimBusDriver {
    /// Number of frames waiting to be received
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl CanSender for SimBusDriver {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        for port in lock(&self.ports).iter() {
            if port.id == self.id {
                continue;
            }
            port.tx.send(msg).map_err(|e| CanSendError(e.into_inner()))?;
            port.read_event.send_event();
        }
        Ok(())
    }
}

impl CanReceiver for SimBusDriver {
    type Error = Infallible;

    fn try_recv(&mut self) -> Result<Option<CanMessage>, Infallible> {
        Ok(self.rx.try_recv().ok())
    }

    fn set_read_event(&mut self, sender: EventSender) {
        for port in lock(&self.ports).iter_mut() {
            if port.id == self.id {
                port.read_event = sender;
                return;
            }
        }
    }
}
