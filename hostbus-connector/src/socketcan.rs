//! CAN driver for Linux socketcan interfaces
use std::io::ErrorKind;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use hostbus_common::{
    messages::CanId,
    traits::{CanReceiver, CanSendError, CanSender},
    CanMessage, EventSender,
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};

/// Timeout of blocking reads, bounding how long shutdown takes
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Longest a write waits for room in the transmit buffer before the frame is handed back
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1);
/// Default number of received frames buffered between the receive thread and the owner
pub const DEFAULT_RX_BUFFER: usize = 1000;

/// Errors of the socketcan driver
#[derive(Debug, Snafu)]
pub enum SocketCanError {
    /// The interface could not be opened
    #[snafu(display("Failed to open CAN interface {interface}: {source}"))]
    Open {
        /// The interface name
        interface: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Setting socket options failed
    #[snafu(display("Failed to configure CAN socket: {source}"))]
    Configure {
        /// Underlying error
        source: std::io::Error,
    },
    /// The receive thread could not be started
    #[snafu(display("Failed to spawn CAN receive thread: {source}"))]
    Spawn {
        /// Underlying error
        source: std::io::Error,
    },
    /// The receive thread has exited, no more frames will arrive
    #[snafu(display("CAN receive thread stopped"))]
    ReceiverStopped,
}

fn to_socketcan_id(id: CanId) -> Option<Id> {
    match id {
        CanId::Extended(id) => ExtendedId::new(id).map(Id::Extended),
        CanId::Std(id) => StandardId::new(id).map(Id::Standard),
    }
}

fn from_socketcan_id(id: Id) -> CanId {
    match id {
        Id::Standard(id) => CanId::std(id.as_raw()),
        Id::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn frame_to_message(frame: &CanFrame) -> Option<CanMessage> {
    match frame {
        CanFrame::Error(_) => None,
        frame => {
            let id = from_socketcan_id(EmbeddedFrame::id(frame));
            if EmbeddedFrame::is_remote_frame(frame) {
                Some(CanMessage::new_rtr(id))
            } else {
                CanMessage::try_new(id, EmbeddedFrame::data(frame)).ok()
            }
        }
    }
}

fn message_to_frame(msg: &CanMessage) -> Option<CanFrame> {
    let id = to_socketcan_id(msg.id())?;
    if msg.is_rtr() {
        CanFrame::new_remote(id, 0)
    } else {
        CanFrame::new(id, msg.data())
    }
}

#[derive(Debug)]
struct RxShared {
    stop: AtomicBool,
    read_event: Mutex<EventSender>,
}

/// A CAN driver for a socketcan interface, e.g. "can0" or "vcan0"
///
/// Frames are read by a background thread and buffered until [`CanReceiver::try_recv`] is called.
/// The registered read event is signalled for every received frame.
///
/// Writes happen on the caller's thread. The socket is shared with the receive thread, which needs
/// blocking reads, so writes can't be made fully non-blocking; instead a write that finds the
/// transmit buffer full waits at most [`WRITE_TIMEOUT`] and then hands the frame back with a
/// [`CanSendError`]. [`BusConnector`](crate::BusConnector) stops flushing at the first refused
/// frame, so one update blocks for at most one `WRITE_TIMEOUT`.
///
/// Reading and writing use the same socket, so frames sent by this driver are not received back.
pub struct SocketCanDriver {
    socket: Arc<CanSocket>,
    rx: Receiver<CanMessage>,
    shared: Arc<RxShared>,
    thread: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for SocketCanDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketCanDriver")
            .field("pending", &self.rx.len())
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

impl SocketCanDriver {
    /// Open a socketcan interface
    ///
    /// # Arguments
    /// * `interface` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
    pub fn open(interface: &str) -> Result<Self, SocketCanError> {
        Self::open_with_buffer(interface, DEFAULT_RX_BUFFER)
    }

    /// Open a socketcan interface, buffering at most `rx_buffer` received frames
    pub fn open_with_buffer(interface: &str, rx_buffer: usize) -> Result<Self, SocketCanError> {
        let socket = CanSocket::open(interface).context(OpenSnafu { interface })?;
        socket.set_read_timeout(READ_TIMEOUT).context(ConfigureSnafu)?;
        socket
            .set_write_timeout(WRITE_TIMEOUT)
            .context(ConfigureSnafu)?;
        let socket = Arc::new(socket);

        let (tx, rx) = channel::bounded(rx_buffer.max(1));
        let shared = Arc::new(RxShared {
            stop: AtomicBool::new(false),
            read_event: Mutex::new(EventSender::default()),
        });

        let thread_socket = socket.clone();
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(format!("hostbus-{interface}-rx"))
            .spawn(move || receive_thread(&thread_socket, &thread_shared, tx))
            .context(SpawnSnafu)?;
        log::info!("Opened CAN interface {interface}");

        Ok(Self {
            socket,
            rx,
            shared,
            thread: Some(thread),
        })
    }
}

impl Drop for SocketCanDriver {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("CAN receive thread panicked");
            }
        }
    }
}

fn receive_thread(socket: &CanSocket, shared: &RxShared, tx: Sender<CanMessage>) {
    while !shared.stop.load(Ordering::Relaxed) {
        let frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => continue,
                _ => {
                    log::error!("Error reading CAN socket: {e}");
                    thread::sleep(READ_TIMEOUT);
                    continue;
                }
            },
        };

        let Some(msg) = frame_to_message(&frame) else {
            log::warn!("CAN error frame received: {frame:?}");
            continue;
        };
        match tx.try_send(msg) {
            Ok(()) => shared
                .read_event
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send_event(),
            Err(TrySendError::Full(msg)) => {
                log::warn!("CAN receive buffer full, dropping {msg:?}");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

impl CanSender for SocketCanDriver {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let Some(frame) = message_to_frame(&msg) else {
            // Can't ever be sent, so don't hand it back for a retry
            log::warn!("Invalid CAN message dropped: {msg:?}");
            return Ok(());
        };
        match self.socket.write_frame(&frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                    log::warn!("Error writing CAN socket: {e}");
                }
                Err(CanSendError(msg))
            }
        }
    }
}

impl CanReceiver for SocketCanDriver {
    type Error = SocketCanError;

    fn try_recv(&mut self) -> Result<Option<CanMessage>, SocketCanError> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => ReceiverStoppedSnafu.fail(),
        }
    }

    fn set_read_event(&mut self, sender: EventSender) {
        *self
            .shared
            .read_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sender;
    }
}
