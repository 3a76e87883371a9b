use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide sessions keyed by external system, e.g. connector id to
/// API client. Every access goes through one mutex, separate from the
/// domain lock manager.
#[derive(Debug)]
pub struct SessionRegistry<K, V> {
    sessions: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for SessionRegistry<K, V> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> SessionRegistry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<K, Arc<V>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing session for `key`, or the one built by `open`.
    pub fn get_or_insert_with(&self, key: &K, open: impl FnOnce() -> V) -> Arc<V> {
        Arc::clone(
            self.sessions()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(open())),
        )
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.sessions().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.sessions().remove(key)
    }

    /// Drop every session. Handles already given out stay valid.
    pub fn clear(&self) {
        self.sessions().clear();
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
