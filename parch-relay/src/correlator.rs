//! Request-id keyed single-resolution signals.
//!
//! Used for the host liveness check: the relay registers a nonce, sends it
//! to the author, and waits for the matching acknowledgement or a timeout.
//! The entry is removed on either outcome so a nonce is never reused.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of waiting on a registered id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited<T> {
    /// Resolved with a value.
    Resolved(T),
    /// Timer fired first.
    TimedOut,
    /// Entry was discarded without a value.
    Dropped,
}

/// Table of pending signals keyed by request id.
#[derive(Debug)]
pub struct Correlator<T> {
    pending: DashMap<String, oneshot::Sender<T>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }
}

impl<T> Correlator<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiving half of its signal.
    ///
    /// Registering an id that is already pending replaces it; the earlier
    /// waiter observes [`Awaited::Dropped`].
    pub fn register(&self, id: impl Into<String>) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.into(), tx);
        rx
    }

    /// Resolve `id` with `value`. Returns false if nothing was pending.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Wait on a registered signal for at most `timeout`.
    ///
    /// The entry for `id` is gone when this returns.
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<T>, timeout: Duration) -> Awaited<T> {
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Awaited::Resolved(value),
            Ok(Err(_)) => Awaited::Dropped,
            Err(_) => Awaited::TimedOut,
        };
        self.pending.remove(id);
        outcome
    }

    /// Drop a pending entry without resolving it.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Whether `id` is pending.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolve_wakes_waiter() {
        let correlator = Arc::new(Correlator::<u32>::new());
        let rx = correlator.register("n1");
        assert!(correlator.is_pending("n1"));

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait("n1", rx, Duration::from_secs(5)).await })
        };
        assert!(correlator.resolve("n1", 7));
        assert_eq!(waiter.await.unwrap(), Awaited::Resolved(7));
        assert!(correlator.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry() {
        let correlator = Correlator::<()>::new();
        let rx = correlator.register("n1");
        let outcome = correlator.wait("n1", rx, Duration::from_secs(2)).await;
        assert_eq!(outcome, Awaited::TimedOut);
        assert!(!correlator.is_pending("n1"));
        // A late acknowledgement finds nothing
        assert!(!correlator.resolve("n1", ()));
    }

    #[tokio::test]
    async fn unknown_id_does_not_resolve() {
        let correlator = Correlator::<()>::new();
        assert!(!correlator.resolve("missing", ()));
    }

    #[tokio::test]
    async fn cancel_drops_waiter() {
        let correlator = Correlator::<()>::new();
        let rx = correlator.register("n1");
        assert!(correlator.cancel("n1"));
        let outcome = correlator.wait("n1", rx, Duration::from_secs(1)).await;
        assert_eq!(outcome, Awaited::Dropped);
    }

    #[tokio::test]
    async fn resolved_before_wait_is_kept() {
        let correlator = Correlator::<&'static str>::new();
        let rx = correlator.register("n1");
        assert!(correlator.resolve("n1", "ack"));
        let outcome = correlator.wait("n1", rx, Duration::from_millis(10)).await;
        assert_eq!(outcome, Awaited::Resolved("ack"));
    }
}
