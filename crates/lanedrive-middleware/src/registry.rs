//! [`SubscriptionRegistry`] – the set of subscriptions the session keeps
//! open on the gateway.
//!
//! Entries are keyed by subscription id and kept in insertion order so that
//! resubscription after a reconnect is deterministic.  Overwriting an
//! existing id keeps its original position.

use lanedrive_types::SubscriptionSpec;

#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionSpec>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `spec`. Re-adding an existing id replaces its topic/type in place.
    pub fn add(&mut self, spec: SubscriptionSpec) {
        match self.entries.iter_mut().find(|entry| entry.id == spec.id) {
            Some(entry) => *entry = spec,
            None => self.entries.push(spec),
        }
    }

    /// Remove `id`, returning the entry if it was tracked. No-op otherwise.
    pub fn remove(&mut self, id: &str) -> Option<SubscriptionSpec> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    /// All tracked subscriptions, in insertion order.
    pub fn all_active(&self) -> &[SubscriptionSpec] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
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
}
