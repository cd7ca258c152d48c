//! Background thread reading packets from a ZeroMQ socket
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hostbus_common::{wire, EventSender, Packet, PacketQueue};

/// Default interval at which the reader thread checks for a stop request
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ReaderState {
    queue: PacketQueue,
    read_event: EventSender,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ReaderState>,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads packets from a socket on a dedicated thread
///
/// Received packets are pushed onto a bounded queue shared with the owner, and the registered
/// [`EventSender`] is signalled for every queued packet. The thread never waits on the owner; once
/// the queue is full, packets are dropped according to the queue's overflow policy.
///
/// The socket is owned by the thread and closed when the thread exits. Dropping the reader stops
/// and joins the thread.
#[derive(Debug)]
pub struct Reader {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Reader {
    /// Start a reader thread on `socket`
    pub fn spawn(
        socket: zmq::Socket,
        queue: PacketQueue,
        poll_timeout: Duration,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ReaderState {
                queue,
                read_event: EventSender::default(),
            }),
            stop: AtomicBool::new(false),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("hostbus-zmq-reader".into())
            .spawn(move || receive_thread(socket, &thread_shared, poll_timeout))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Register the sender notified on each received packet
    ///
    /// If packets were queued before registration, the new sender is signalled right away.
    pub fn set_read_event(&self, sender: EventSender) {
        let backlog = {
            let mut state = self.shared.lock();
            state.read_event = sender.clone();
            !state.queue.is_empty()
        };
        if backlog {
            sender.send_event();
        }
    }

    /// Returns true if a packet is queued
    pub fn is_packet_available(&self) -> bool {
        !self.shared.lock().queue.is_empty()
    }

    /// Get a copy of the packet at the front of the queue
    ///
    /// The payload buffer is shared, not copied.
    pub fn front(&self) -> Option<Packet> {
        self.shared.lock().queue.front().cloned()
    }

    /// Remove and return the packet at the front of the queue
    pub fn pop(&self) -> Option<Packet> {
        self.shared.lock().queue.pop()
    }

    /// Number of queued packets
    pub fn queued_packets(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Number of packets dropped because the queue was full
    pub fn dropped_packets(&self) -> u64 {
        self.shared.lock().queue.dropped()
    }

    /// Returns false once the reader thread has exited
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the reader thread to exit and wait for it
    ///
    /// The thread notices the request within one poll timeout. Queued packets remain available.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("ZeroMQ reader thread panicked");
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_thread(socket: zmq::Socket, shared: &Shared, poll_timeout: Duration) {
    let timeout_ms = poll_timeout.as_millis().min(i64::MAX as u128) as i64;
    log::debug!("ZeroMQ reader started");

    while !shared.stop.load(Ordering::Relaxed) {
        match socket.poll(zmq::POLLIN, timeout_ms) {
            Ok(0) => continue,
            Ok(_) => (),
            Err(zmq::Error::EINTR) => continue,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                log::error!("ZeroMQ poll error: {e}");
                thread::sleep(poll_timeout);
                continue;
            }
        }

        // Drain everything which arrived, so one poll wakeup serves a burst of messages
        loop {
            let msg = match socket.recv_bytes(zmq::DONTWAIT) {
                Ok(msg) => msg,
                Err(zmq::Error::EAGAIN) => break,
                Err(zmq::Error::ETERM) => return,
                Err(e) => {
                    log::error!("ZeroMQ receive error: {e}");
                    break;
                }
            };
            match wire::decode_bytes(msg.into()) {
                Ok(packet) => queue_packet(shared, packet),
                Err(e) => log::warn!("Discarding malformed message: {e}"),
            }
        }
    }

    log::debug!("ZeroMQ reader stopped");
}

fn queue_packet(shared: &Shared, packet: Packet) {
    let read_event = {
        let mut state = shared.lock();
        if !state.queue.push(packet).is_queued() {
            return;
        }
        state.read_event.clone()
    };
    // Notify outside of the queue lock
    read_event.send_event();
}
