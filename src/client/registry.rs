//! Subscription registry: the authoritative "desired" set.
//!
//! The registry records what the caller wants to be subscribed to,
//! independent of connection state. The wire is merely a projection of it:
//! after any reconnect the driver replays every entry, so membership here is
//! the single source of truth. Entries survive reconnects until explicitly
//! removed.

use std::collections::BTreeSet;

use crate::protocol::Subscription;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeSet<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription. Idempotent; returns true if newly inserted.
    pub fn add(&mut self, subscription: Subscription) -> bool {
        self.entries.insert(subscription)
    }

    /// Removes a subscription; returns true if it was present.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        self.entries.remove(subscription)
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains(subscription)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates in deterministic (channel, subject) order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Channel;

    fn sub(channel: Channel, subject: &str) -> Subscription {
        Subscription::new(channel, subject)
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.add(sub(Channel::Market, "X")));
        assert!(!registry.add(sub(Channel::Market, "X")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.remove(&sub(Channel::Trades, "X")));
        registry.add(sub(Channel::Trades, "X"));
        assert!(registry.remove(&sub(Channel::Trades, "X")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_same_subject_different_channels() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sub(Channel::Market, "X"));
        registry.add(sub(Channel::Orderbook, "X"));
        assert_eq!(registry.len(), 2);
        registry.remove(&sub(Channel::Market, "X"));
        assert!(registry.contains(&sub(Channel::Orderbook, "X")));
    }

    #[test]
    fn test_final_set_equals_subscribes_minus_unsubscribes() {
        // registry content is insensitive to call interleaving
        let mut registry = SubscriptionRegistry::new();
        registry.add(sub(Channel::Market, "A"));
        registry.add(sub(Channel::Market, "B"));
        registry.remove(&sub(Channel::Market, "A"));
        registry.add(sub(Channel::Market, "C"));
        registry.add(sub(Channel::Market, "B"));
        registry.remove(&sub(Channel::Market, "D"));

        let remaining: Vec<String> =
            registry.iter().map(|s| s.subject.clone()).collect();
        assert_eq!(remaining, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_iteration_order_is_deterministic() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sub(Channel::Trades, "B"));
        registry.add(sub(Channel::Market, "Z"));
        registry.add(sub(Channel::Market, "A"));

        let first: Vec<Subscription> = registry.snapshot();
        let second: Vec<Subscription> = registry.snapshot();
        assert_eq!(first, second);
        assert_eq!(first[0], sub(Channel::Market, "A"));
        assert_eq!(first[1], sub(Channel::Market, "Z"));
        assert_eq!(first[2], sub(Channel::Trades, "B"));
    }
}
