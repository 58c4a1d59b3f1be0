use std::sync::Arc;

use dashmap::DashMap;

use crate::types::ChannelId;

/// Per-key substitutes recorded for one unhealthy channel.
pub type Substitutions = Arc<DashMap<String, ChannelId>>;

/// Channels currently unusable for routing, each with the substitutes chosen
/// for its affinity keys.
///
/// Presence of a channel id means "not usable"; absence means "usable". The
/// substitution records are hints only: a substitute that is itself present in
/// the table is ignored by routing.
#[derive(Debug, Default)]
pub struct FallbackTable {
    unhealthy: DashMap<ChannelId, Substitutions>,
}

impl FallbackTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` unhealthy. Returns `true` if it was previously healthy.
    ///
    /// An existing entry and its substitutions are kept, so repeated
    /// not-ready transitions keep routing keys to the same substitutes.
    pub fn mark_unhealthy(&self, id: ChannelId) -> bool {
        let mut inserted = false;
        self.unhealthy.entry(id).or_insert_with(|| {
            inserted = true;
            Arc::new(DashMap::new())
        });
        inserted
    }

    /// Marks `id` healthy, dropping its substitutions. Returns `true` if it
    /// was previously unhealthy.
    pub fn mark_healthy(&self, id: ChannelId) -> bool {
        self.unhealthy.remove(&id).is_some()
    }

    #[must_use]
    pub fn is_unhealthy(&self, id: ChannelId) -> bool {
        self.unhealthy.contains_key(&id)
    }

    /// Substitution map of `id`, if it is unhealthy.
    #[must_use]
    pub fn substitutions(&self, id: ChannelId) -> Option<Substitutions> {
        self.unhealthy.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Substitute recorded for `key` on unhealthy channel `id`.
    #[must_use]
    pub fn substitute(&self, id: ChannelId, key: &str) -> Option<ChannelId> {
        let substitutions = self.substitutions(id)?;
        // Bound so the entry guard drops before `substitutions`.
        let substitute = substitutions.get(key).map(|entry| *entry.value());
        substitute
    }

    /// Ids of every unhealthy channel, ascending.
    #[must_use]
    pub fn unhealthy_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.unhealthy.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.unhealthy.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unhealthy.is_empty()
    }
}
