//! Pending-request table for in-flight correlation.
//!
//! Every outgoing command that expects a correlated reply gets a fresh
//! `messageId` (monotonic per client, never reused) before transmission.
//! Entries leave the table exactly once: on a matching response, on their
//! deadline, or when the connection is torn down - a caller is never left
//! hanging.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::StreamError;
use crate::protocol::{Channel, Subscription};

/// Successful subscription acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    pub channel: Channel,
    pub subject: String,
}

pub type AckResult = Result<SubscriptionAck, StreamError>;

struct PendingEntry {
    subscription: Subscription,
    deadline: Instant,
    responder: oneshot::Sender<AckResult>,
}

#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(
        &mut self,
        message_id: u64,
        subscription: Subscription,
        deadline: Instant,
        responder: oneshot::Sender<AckResult>,
    ) {
        // ids are monotonic, so collision is impossible by construction
        self.entries.insert(
            message_id,
            PendingEntry {
                subscription,
                deadline,
                responder,
            },
        );
    }

    /// Resolves the entry with the given id. A success outcome is turned
    /// into an ack built from the stored subscription. Returns false if no
    /// such entry exists.
    pub fn resolve(&mut self, message_id: u64, outcome: Result<(), StreamError>) -> bool {
        let Some(entry) = self.entries.remove(&message_id) else {
            return false;
        };
        let result = outcome.map(|()| SubscriptionAck {
            channel: entry.subscription.channel,
            subject: entry.subscription.subject,
        });
        let _ = entry.responder.send(result);
        true
    }

    /// Resolves the oldest entry matching (channel, subject). Used when the
    /// server does not echo a message id on its ack.
    pub fn resolve_matching(
        &mut self,
        channel: Channel,
        subject: &str,
        outcome: Result<(), StreamError>,
    ) -> bool {
        let oldest = self
            .entries
            .iter()
            .filter(|(_, e)| e.subscription.channel == channel && e.subscription.subject == subject)
            .map(|(id, _)| *id)
            .min();
        match oldest {
            Some(id) => self.resolve(id, outcome),
            None => false,
        }
    }

    /// Rejects every outstanding entry and clears the table.
    pub fn reject_all(&mut self, mut make_error: impl FnMut() -> StreamError) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.responder.send(Err(make_error()));
        }
    }

    /// Rejects entries whose deadline has passed; returns how many.
    pub fn expire(&mut self, now: Instant) -> usize {
        let due: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry.responder.send(Err(StreamError::RequestTimeout));
            }
        }
        due.len()
    }

    /// Earliest outstanding deadline, for timer scheduling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("outstanding", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sub(subject: &str) -> Subscription {
        Subscription::new(Channel::Market, subject)
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_resolve_builds_ack_from_subscription() {
        let mut pending = PendingRequests::new();
        let (tx, mut rx) = oneshot::channel();
        pending.register(1, sub("X"), far(), tx);

        assert!(pending.resolve(1, Ok(())));
        assert!(pending.is_empty());

        let ack = rx.try_recv().unwrap().unwrap();
        assert_eq!(ack.channel, Channel::Market);
        assert_eq!(ack.subject, "X");
    }

    #[test]
    fn test_resolve_unknown_id_is_false() {
        let mut pending = PendingRequests::new();
        assert!(!pending.resolve(42, Ok(())));
    }

    #[test]
    fn test_resolve_matching_picks_oldest() {
        let mut pending = PendingRequests::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(1, sub("X"), far(), tx1);
        pending.register(2, sub("X"), far(), tx2);

        assert!(pending.resolve_matching(Channel::Market, "X", Ok(())));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_reject_all_clears_table() {
        let mut pending = PendingRequests::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(1, sub("A"), far(), tx1);
        pending.register(2, sub("B"), far(), tx2);

        pending.reject_all(|| StreamError::ConnectionClosed);
        assert!(pending.is_empty());
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(StreamError::ConnectionClosed)
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_expire_rejects_only_due_entries() {
        let mut pending = PendingRequests::new();
        let now = Instant::now();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(1, sub("A"), now - Duration::from_millis(1), tx1);
        pending.register(2, sub("B"), now + Duration::from_secs(60), tx2);

        assert_eq!(pending.expire(now), 1);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(StreamError::RequestTimeout)
        ));
        assert!(rx2.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_next_deadline_is_minimum() {
        let mut pending = PendingRequests::new();
        assert!(pending.next_deadline().is_none());

        let now = Instant::now();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        pending.register(1, sub("A"), now + Duration::from_secs(5), tx1);
        pending.register(2, sub("B"), now + Duration::from_secs(2), tx2);
        assert_eq!(pending.next_deadline(), Some(now + Duration::from_secs(2)));
    }
}
