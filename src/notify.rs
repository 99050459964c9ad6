//! Change-notification registry shared by the backends.
//!
//! Listeners are registered against a [`ContentPath`] and invoked whenever a
//! mutation touches that path. Fan-out follows the path hierarchy:
//! - a row change notifies listeners on the row and on its table
//! - a table change notifies listeners on the table and on every row in it
//!
//! Callbacks run on the notifying thread, after the registry lock has been
//! released, so a callback may query the backend or unregister itself.

use crate::types::{ContentPath, ListenerId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Callback invoked with the path that changed.
pub type ChangeCallback = Arc<dyn Fn(&ContentPath) + Send + Sync>;

struct Listener {
    path: ContentPath,
    callback: ChangeCallback,
}

/// Registry mapping paths to interested listener callbacks.
pub struct ChangeRegistry {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl ChangeRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for changes at or beneath `path`.
    pub fn register(&self, path: ContentPath, callback: ChangeCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        trace!(?id, %path, "registering change listener");
        self.listeners.write().insert(id, Listener { path, callback });
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().remove(&id).is_some();
        trace!(?id, removed, "unregistering change listener");
        removed
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke every listener interested in `changed`.
    ///
    /// Listeners are called in registration order.
    pub fn notify(&self, changed: &ContentPath) {
        let mut targets: Vec<(ListenerId, ChangeCallback)> = {
            let listeners = self.listeners.read();
            listeners
                .iter()
                .filter(|(_, l)| l.path.contains(changed) || changed.contains(&l.path))
                .map(|(id, l)| (*id, Arc::clone(&l.callback)))
                .collect()
        };
        targets.sort_by_key(|(id, _)| *id);

        trace!(%changed, listeners = targets.len(), "dispatching change notification");
        for (_, callback) in targets {
            callback(changed);
        }
    }
}

impl Default for ChangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
