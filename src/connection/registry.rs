// src/connection/registry.rs
use std::collections::{BTreeMap, HashMap};

use super::subscription::{Subscription, SubscriptionId};

/// Channel name → subscription bookkeeping.
///
/// Ids are allocated monotonically, so iterating `by_id` replays channels in
/// the order they were first requested.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    by_id: BTreeMap<SubscriptionId, Subscription>,
    by_name: HashMap<String, SubscriptionId>,
}

impl ChannelRegistry {
    /// Returns the subscription for `channel`, creating it if needed.
    /// The flag is true when a new subscription was allocated.
    pub fn get_or_insert(&mut self, channel: &str) -> (Subscription, bool) {
        if let Some(existing) = self.by_name.get(channel).and_then(|id| self.by_id.get(id)) {
            return (existing.clone(), false);
        }

        let subscription = Subscription::new(channel);
        self.by_name.insert(channel.to_string(), subscription.id());
        self.by_id.insert(subscription.id(), subscription.clone());
        (subscription, true)
    }

    pub fn find(&self, id: SubscriptionId) -> Option<Subscription> {
        self.by_id.get(&id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.by_id.values()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
    }
}
