//! Wait on events occurring in other threads without busy waiting
//!
//! The thread that wants to wait creates an [`EventPoller`] and hands an [`EventSender`], obtained
//! with [`EventPoller::event_sender`], to every worker that produces events. Workers call
//! [`EventSender::send_event`] whenever something happened, and the owner of the poller calls
//! [`EventPoller::wait`] or [`EventPoller::wait_for`] to sleep until that happens.
//!
//! Events are not counted. Any number of `send_event` calls made while the owner is busy collapse
//! into a single pending event, so the next `wait` returns immediately exactly once.
//!
//! Senders only hold a weak reference to the poller's state. They remain usable after the poller is
//! dropped, at which point `send_event` does nothing and `is_valid` returns false.
//!
//! ```
//! use std::thread;
//! use hostbus_common::EventPoller;
//!
//! let poller = EventPoller::new();
//! let sender = poller.event_sender();
//! let worker = thread::spawn(move || sender.send_event());
//! poller.wait();
//! worker.join().unwrap();
//! ```
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // The flag is a plain bool, so it can't be left inconsistent by a panicking holder
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_event(&self) {
        *self.lock() = true;
        self.cv.notify_one();
    }
}

/// Single consumer side of the event notification
///
/// Only the owner may wait on the poller. It is intentionally not `Clone`; hand out
/// [`EventSender`]s to other threads instead.
///
/// Moving the poller keeps all issued senders attached to it. `std::mem::take` can be used to move
/// the state out of a poller, leaving a fresh poller with no senders behind.
#[derive(Debug, Default)]
pub struct EventPoller {
    shared: Arc<Shared>,
}

impl EventPoller {
    /// Create a new poller with no pending event
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until an event has been sent since the last successful wait
    ///
    /// Returns immediately if an event is already pending. The pending event is consumed.
    pub fn wait(&self) {
        let mut pending = self
            .shared
            .cv
            .wait_while(self.shared.lock(), |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        *pending = false;
    }

    /// Block until an event is sent, or the timeout expires
    ///
    /// Returns true, consuming the event, if an event occurred. Returns false on timeout, in which
    /// case no event is pending.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let (mut pending, _) = self
            .shared
            .cv
            .wait_timeout_while(self.shared.lock(), timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        let occurred = *pending;
        *pending = false;
        occurred
    }

    /// Check for a pending event without consuming it
    pub fn has_event_occurred(&self) -> bool {
        *self.shared.lock()
    }

    /// Create a new sender for this poller
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            parent: Arc::downgrade(&self.shared),
        }
    }
}

/// Producer side of the event notification
///
/// Senders are cheap to clone and may be used from any thread. A default constructed sender is not
/// attached to any poller.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    parent: Weak<Shared>,
}

impl EventSender {
    /// Signal the poller, waking its owner if it is waiting
    ///
    /// Does nothing if the poller no longer exists.
    pub fn send_event(&self) {
        if let Some(shared) = self.parent.upgrade() {
            shared.send_event();
        }
    }

    /// Returns true while the poller this sender was created from still exists
    pub fn is_valid(&self) -> bool {
        self.parent.strong_count() > 0
    }
}
