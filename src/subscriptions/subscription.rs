//! Hot subscription bridging backend change notifications to typed values.

use crate::error::{Result, StoreError};
use crate::notify::ChangeCallback;
use crate::store::RowSource;
use crate::types::{ContentPath, DeletePolicy, ListenerId, StoreValue, SubscriptionId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// State shared between a subscription and its change listener.
struct Delivery<V> {
    /// Cleared on cancel or failure; the listener does nothing afterwards.
    active: AtomicBool,
    /// Last value pushed to the channel. The lock also serializes
    /// notifications so values are delivered in commit order.
    last: Mutex<V>,
    sender: Sender<Result<V>>,
}

impl<V: StoreValue> Delivery<V> {
    fn on_change(
        &self,
        id: SubscriptionId,
        source: &RowSource<V>,
        row_key: &str,
        policy: DeletePolicy,
    ) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let mut last = self.last.lock();
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let next = match source.read(row_key) {
            Ok(Some(value)) => value,
            Ok(None) => match policy {
                DeletePolicy::Silent => {
                    trace!(?id, key = row_key, "row absent, not emitting");
                    return;
                }
                DeletePolicy::EmitAbsence => V::none(),
            },
            Err(e) => {
                warn!(?id, key = row_key, error = %e, "subscription failed");
                self.active.store(false, Ordering::SeqCst);
                let _ = self.sender.send(Err(e));
                return;
            }
        };

        if next == *last {
            trace!(?id, key = row_key, "unchanged value, not emitting");
            return;
        }

        *last = next.clone();
        let _ = self.sender.send(Ok(next));
    }
}

/// A live stream of values for one key.
///
/// Receives the snapshot of the [`LiveQuery`](super::LiveQuery) it came from,
/// then each distinct value committed for the key. Never completes; drop or
/// [`cancel`](Self::cancel) it to stop listening.
pub struct Subscription<V: StoreValue> {
    id: SubscriptionId,
    listener: ListenerId,
    path: ContentPath,
    receiver: Receiver<Result<V>>,
    delivery: Arc<Delivery<V>>,
    source: Arc<RowSource<V>>,
    /// Set once a terminal error has been handed to the caller.
    closed: AtomicBool,
    /// Terminal error held back by `drain` until the next receive.
    pending_error: Mutex<Option<StoreError>>,
}

impl<V: StoreValue> Subscription<V> {
    pub(crate) fn start(
        id: SubscriptionId,
        row_key: String,
        snapshot: V,
        source: Arc<RowSource<V>>,
        policy: DeletePolicy,
    ) -> Self {
        let (sender, receiver) = unbounded();

        // Queue the snapshot before listening so it is always first.
        let _ = sender.send(Ok(snapshot.clone()));

        let delivery = Arc::new(Delivery {
            active: AtomicBool::new(true),
            last: Mutex::new(snapshot),
            sender,
        });

        let path = source.row_path(&row_key);
        let callback: ChangeCallback = {
            let delivery = Arc::clone(&delivery);
            let source = Arc::clone(&source);
            Arc::new(move |_: &ContentPath| {
                delivery.on_change(id, &source, &row_key, policy);
            })
        };
        let listener = source
            .backend
            .register_change_listener(path.clone(), callback);

        debug!(?id, %path, "subscription started");

        Self {
            id,
            listener,
            path,
            receiver,
            delivery,
            source,
            closed: AtomicBool::new(false),
            pending_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Path this subscription listens on.
    pub fn path(&self) -> &ContentPath {
        &self.path
    }

    /// Whether the subscription is still following changes.
    pub fn is_active(&self) -> bool {
        self.delivery.active.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Receive the next value (blocking).
    pub fn recv(&self) -> Result<V> {
        self.ensure_open()?;
        match self.receiver.recv() {
            Ok(item) => self.settle(item),
            Err(_) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// Receive a value if one is ready (non-blocking).
    pub fn try_recv(&self) -> Result<Option<V>> {
        self.ensure_open()?;
        match self.receiver.try_recv() {
            Ok(item) => self.settle(item).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// Receive with timeout. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<V>> {
        self.ensure_open()?;
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => self.settle(item).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// Take every value delivered so far.
    ///
    /// Stops at a terminal error. Values queued before it are returned and
    /// the error is reported by the next receive; it is returned directly
    /// only when nothing preceded it.
    pub fn drain(&self) -> Result<Vec<V>> {
        self.ensure_open()?;
        let mut values = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(Ok(value)) => values.push(value),
                Ok(Err(e)) if values.is_empty() => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    *self.pending_error.lock() = Some(e);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if values.is_empty() => {
                    return Err(StoreError::SubscriptionClosed)
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(values)
    }

    /// Stop listening. Equivalent to dropping the subscription.
    pub fn cancel(self) {}

    fn ensure_open(&self) -> Result<()> {
        if let Some(e) = self.pending_error.lock().take() {
            self.closed.store(true, Ordering::SeqCst);
            return Err(e);
        }
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::SubscriptionClosed)
        } else {
            Ok(())
        }
    }

    fn settle(&self, item: Result<V>) -> Result<V> {
        if item.is_err() {
            self.closed.store(true, Ordering::SeqCst);
        }
        item
    }
}

impl<V: StoreValue> Drop for Subscription<V> {
    fn drop(&mut self) {
        self.delivery.active.store(false, Ordering::SeqCst);
        // Waits out a notification that is mid-query for this subscription.
        drop(self.delivery.last.lock());
        self.source.backend.unregister_change_listener(self.listener);
        debug!(id = ?self.id, path = %self.path, "subscription cancelled");
    }
}
