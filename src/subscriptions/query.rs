//! Cold live query holding its creation-time snapshot.

use super::subscription::Subscription;
use crate::store::RowSource;
use crate::types::{DeletePolicy, StoreValue, SubscriptionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A live view of one key that has not started listening yet.
///
/// Every subscription replays the snapshot taken when the query was built,
/// even if the stored value changed in between. Changes made before
/// [`subscribe`](Self::subscribe) are not replayed.
pub struct LiveQuery<V: StoreValue> {
    key: V::Key,
    snapshot: V,
    source: Arc<RowSource<V>>,
    delete_policy: DeletePolicy,
    ids: Arc<AtomicU64>,
}

impl<V: StoreValue> LiveQuery<V> {
    pub(crate) fn new(
        key: V::Key,
        snapshot: V,
        source: Arc<RowSource<V>>,
        delete_policy: DeletePolicy,
        ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            key,
            snapshot,
            source,
            delete_policy,
            ids,
        }
    }

    pub fn key(&self) -> &V::Key {
        &self.key
    }

    /// The value captured when this query was built.
    pub fn snapshot(&self) -> &V {
        &self.snapshot
    }

    /// Start listening for changes to the key.
    pub fn subscribe(&self) -> Subscription<V> {
        let id = SubscriptionId(self.ids.fetch_add(1, Ordering::SeqCst));
        Subscription::start(
            id,
            self.key.to_string(),
            self.snapshot.clone(),
            Arc::clone(&self.source),
            self.delete_policy,
        )
    }
}
