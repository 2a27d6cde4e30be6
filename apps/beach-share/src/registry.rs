use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::negotiation::NegotiationEngine;
use crate::signaling::PeerId;

/// Remote participant id to its negotiation. Entries are created at most once
/// per id and live for the whole session.
pub struct PeerRegistry<E = NegotiationEngine> {
    entries: RwLock<HashMap<PeerId, Arc<E>>>,
}

impl<E> Default for PeerRegistry<E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> PeerRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<E>> {
        self.entries.read().get(id).cloned()
    }

    /// Return the entry for `id`, building it with `create` if there is none.
    /// The flag is `true` when this call created the entry. `create` runs
    /// under the registry lock and must not block.
    pub fn get_or_create<F>(&self, id: &PeerId, create: F) -> (Arc<E>, bool)
    where
        F: FnOnce() -> Arc<E>,
    {
        if let Some(existing) = self.get(id) {
            return (existing, false);
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(id) {
            return (Arc::clone(existing), false);
        }
        let entry = create();
        entries.insert(id.clone(), Arc::clone(&entry));
        (entry, true)
    }

    pub fn all(&self) -> Vec<Arc<E>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
