use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// A shared `id -> T` table with a monotonic ID allocator.
///
/// Reads take the shared lock; `add`/`remove` reserve the ID with an atomic
/// counter first and hold the exclusive lock only for the map update. Suited
/// for read-heavy tables such as the server's global list.
pub struct SharedRegistry<T> {
    entries: RwLock<HashMap<u32, Arc<T>>>,
    next_id: AtomicU32,
}

impl<T> Default for SharedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Insert a value under a freshly allocated ID and return the ID.
    ///
    /// IDs are never reused, even after [`remove`](Self::remove).
    pub fn add(&self, value: T) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().unwrap().insert(id, Arc::new(value));
        id
    }

    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.entries.read().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<T>> {
        self.entries.write().unwrap().remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.read().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Snapshot of all entries, ordered by ID.
    pub fn entries(&self) -> Vec<(u32, Arc<T>)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let registry = SharedRegistry::new();
        let a = registry.add("a");
        let b = registry.add("b");
        assert!(b > a);
        registry.remove(a);
        let c = registry.add("c");
        assert!(c > b);
    }

    #[test]
    fn lookup_and_remove() {
        let registry = SharedRegistry::new();
        let id = registry.add(7u32);
        assert!(registry.contains(id));
        assert_eq!(*registry.get(id).unwrap(), 7);
        assert_eq!(registry.len(), 1);

        registry.remove(id);
        assert!(!registry.contains(id));
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_adds_do_not_collide() {
        let registry = Arc::new(SharedRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..100).map(|i| registry.add(i)).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(registry.len(), 400);
    }
}
