//! Bounded outbound mailbox with fail-fast overflow.
//!
//! Delivery never waits. If a connection's queue is full the mailbox is
//! closed and the connection torn down, so one slow reader cannot stall the
//! tasks broadcasting to it.

use parch_types::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};

/// Sending half of a connection's outbound queue plus its teardown signal.
#[derive(Debug)]
pub struct Mailbox {
    sender: mpsc::Sender<Frame>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued.
    Queued,
    /// Queue was full; the mailbox has been closed.
    Overflowed,
    /// Mailbox already closed; frame dropped.
    Closed,
}

impl Mailbox {
    /// Create a mailbox holding up to `capacity` frames.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        (
            Self {
                sender,
                closed: AtomicBool::new(false),
                shutdown,
            },
            receiver,
        )
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close();
                Delivery::Overflowed
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Delivery::Closed
            }
        }
    }

    /// Close the mailbox and fire the teardown signal. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.send_replace(true);
        }
    }

    /// Whether the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the mailbox is closed.
    pub async fn closed(&self) {
        let mut signal = self.shutdown.subscribe();
        let _ = signal.wait_for(|closed| *closed).await;
    }
}
