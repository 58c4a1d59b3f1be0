use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{pool::handle::ChannelHandle, types::ChannelId};

/// Concurrent affinity key → channel mapping.
///
/// A key maps to at most one channel at any instant. Binding an already bound
/// key moves it, keeping every channel's bind counter in step with the table.
#[derive(Debug, Default)]
pub struct AffinityTable {
    entries: DashMap<String, Arc<ChannelHandle>>,
}

impl AffinityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every key to `handle`, unbinding any previous owner first.
    pub fn bind(&self, handle: &Arc<ChannelHandle>, keys: &[String]) {
        for key in keys {
            loop {
                if let Entry::Vacant(slot) = self.entries.entry(key.clone()) {
                    // Count before publishing: an unbind can only see a counted entry.
                    handle.affinity_incr();
                    slot.insert(Arc::clone(handle));
                    break;
                }
                // Occupied: release the shard lock before unbinding.
                self.unbind_key(key);
            }
        }
    }

    /// Removes every key that is present. Absent keys are ignored.
    pub fn unbind(&self, keys: &[String]) {
        for key in keys {
            self.unbind_key(key);
        }
    }

    fn unbind_key(&self, key: &str) {
        if let Some((_, previous)) = self.entries.remove(key) {
            previous.affinity_decr();
        }
    }

    /// Channel currently bound to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ChannelHandle>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn channel_id(&self, key: &str) -> Option<ChannelId> {
        self.get(key).map(|handle| handle.id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently bound to the channel with `id`.
    #[must_use]
    pub fn keys_for(&self, id: ChannelId) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().id() == id)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
