use crate::PodPath;
use std::collections::{BTreeMap, HashMap};

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_ENTRIES: usize = 4096;

type EntryId = u64;

struct CacheSlot<V> {
    value: V,
    entry_id: EntryId,
}

/// Path keyed cache with least-recently-used eviction.
///
/// Entry ids grow on every insert or hit, so the smallest id in `lru` is
/// always the oldest entry.
pub struct PathCache<V> {
    slots: HashMap<PodPath, CacheSlot<V>>,
    lru: BTreeMap<EntryId, PodPath>,
    next_entry_id: EntryId,
    max_entries: usize,
}

impl<V: Clone> Default for PathCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ENTRIES)
    }
}

impl<V: Clone> PathCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: HashMap::new(),
            lru: BTreeMap::new(),
            next_entry_id: 0,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn next_id(&mut self) -> EntryId {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }

    pub fn get(&mut self, path: &PodPath) -> Option<V> {
        let new_id = self.next_id();
        let slot = self.slots.get_mut(path)?;
        self.lru.remove(&slot.entry_id);
        slot.entry_id = new_id;
        self.lru.insert(new_id, path.clone());
        Some(slot.value.clone())
    }

    pub fn contains(&self, path: &PodPath) -> bool {
        self.slots.contains_key(path)
    }

    pub fn put(&mut self, path: PodPath, value: V) {
        let entry_id = self.next_id();
        if let Some(old) = self.slots.insert(path.clone(), CacheSlot { value, entry_id }) {
            self.lru.remove(&old.entry_id);
        }
        self.lru.insert(entry_id, path);

        while self.slots.len() > self.max_entries {
            let Some((_, oldest)) = self.lru.pop_first() else {
                break;
            };
            self.slots.remove(&oldest);
        }
    }

    pub fn remove(&mut self, path: &PodPath) -> Option<V> {
        let slot = self.slots.remove(path)?;
        self.lru.remove(&slot.entry_id);
        Some(slot.value)
    }

    /// Drop `prefix` and everything below it.
    pub fn remove_subtree(&mut self, prefix: &PodPath) -> usize {
        let doomed: Vec<PodPath> = self
            .slots
            .keys()
            .filter(|p| *p == prefix || p.is_descendant_of(prefix))
            .cloned()
            .collect();
        for path in doomed.iter() {
            self.remove(path);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.lru.clear();
    }
}
