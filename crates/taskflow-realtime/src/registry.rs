//! Keyed listener lists.
//!
//! Callbacks are cloned out of the lock before they run, so a callback may
//! register or remove listeners (or call back into the client) freely.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use taskflow_core::ErrorCategory;

pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Handle returned by registration, used to remove one listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct ListenerRegistry<K, A: ?Sized> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<K, Vec<(ListenerId, Listener<A>)>>>,
}

impl<K, A: ?Sized> Default for ListenerRegistry<K, A> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, A: ?Sized> ListenerRegistry<K, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: K, listener: Listener<A>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(key)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener, or every listener for `key` when `id` is `None`.
    /// Returns how many were removed.
    pub fn remove(&self, key: &K, id: Option<ListenerId>) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|(existing, _)| *existing != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Invoke every listener for `key` in registration order. Returns how
    /// many ran.
    pub fn emit(&self, key: &K, arg: &A) -> usize {
        let snapshot: Vec<Listener<A>> = self
            .listeners
            .lock()
            .get(key)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in &snapshot {
            listener(arg);
        }
        snapshot.len()
    }

    pub fn count(&self, key: &K) -> usize {
        self.listeners.lock().get(key).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

/// Which errors an error listener receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorFilter {
    Category(ErrorCategory),
    /// Every error, whatever its category.
    Any,
}

impl From<ErrorCategory> for ErrorFilter {
    fn from(category: ErrorCategory) -> Self {
        Self::Category(category)
    }
}
