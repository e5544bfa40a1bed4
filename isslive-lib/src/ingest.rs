use std::{
    collections::HashMap,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{select, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::store::LiveValueStore;

/// Field carrying a channel's measurement in an item update.
pub const PRIMARY_FIELD: &str = "Value";

/// A push notification for a single subscribed item.
///
/// Upstream may deliver several fields per item; only the primary field is ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    /// Upstream channel identifier.
    pub item: String,
    pub fields: HashMap<String, String>,
}

impl ItemUpdate {
    /// An update carrying a single field.
    #[must_use]
    pub fn new<I, F, V>(item: I, field: F, value: V) -> Self
    where
        I: Into<String>,
        F: Into<String>,
        V: Into<String>,
    {
        Self {
            item: item.into(),
            fields: HashMap::from([(field.into(), value.into())]),
        }
    }

    /// An update carrying only the primary value field.
    #[must_use]
    pub fn value<I: Into<String>, V: Into<String>>(item: I, value: V) -> Self {
        Self::new(item, PRIMARY_FIELD, value)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Receives notifications for a subscription.
///
/// Implementations must tolerate being called from a transport thread while other threads
/// read.
pub trait SubscriptionListener: Send + Sync {
    fn on_item_update(&self, update: &ItemUpdate);

    /// The transport accepted the subscription.
    fn on_subscription(&self) {}

    /// The subscription ended, e.g., on disconnect or end of a recorded feed.
    fn on_unsubscription(&self) {}
}

/// Writes the primary field of each notification into a [LiveValueStore].
///
/// Other fields, and notifications without the primary field, are ignored.
#[derive(Debug, Clone)]
pub struct StoreListener {
    store: Arc<LiveValueStore>,
    field: String,
}

impl StoreListener {
    #[must_use]
    pub fn new(store: Arc<LiveValueStore>) -> Self {
        Self::with_field(store, PRIMARY_FIELD)
    }

    /// Listener ingesting `field` instead of [PRIMARY_FIELD].
    #[must_use]
    pub fn with_field<F: Into<String>>(store: Arc<LiveValueStore>, field: F) -> Self {
        Self {
            store,
            field: field.into(),
        }
    }
}

impl SubscriptionListener for StoreListener {
    fn on_item_update(&self, update: &ItemUpdate) {
        match update.field(&self.field) {
            Some(value) => self.store.update(&update.item, value),
            None => trace!(item = update.item.as_str(), "no primary field; ignoring"),
        }
    }

    fn on_subscription(&self) {
        debug!(field = self.field.as_str(), "subscribed");
    }

    fn on_unsubscription(&self) {
        debug!(
            field = self.field.as_str(),
            updates = self.store.update_count(),
            "unsubscribed"
        );
    }
}

/// Fans one notification out to several listeners.
#[derive(Clone, Default)]
pub struct Listeners(Vec<Arc<dyn SubscriptionListener>>);

impl Listeners {
    pub fn push(&mut self, listener: Arc<dyn SubscriptionListener>) {
        self.0.push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listeners[len={}]", self.0.len())
    }
}

impl SubscriptionListener for Listeners {
    fn on_item_update(&self, update: &ItemUpdate) {
        for l in &self.0 {
            l.on_item_update(update);
        }
    }

    fn on_subscription(&self) {
        for l in &self.0 {
            l.on_subscription();
        }
    }

    fn on_unsubscription(&self) {
        for l in &self.0 {
            l.on_unsubscription();
        }
    }
}

/// Drain `updates` into `listener` on a background thread.
///
/// The thread exits when all update senders are dropped or when `shutdown` receives a message
/// or is disconnected; pass [crossbeam::channel::never] to run until the feed ends. Updates
/// already queued when shutdown is signaled are applied before exiting. Updates are delivered
/// one at a time in the order received, so updates for the same item are never reordered.
///
/// # Errors
/// If the thread cannot be spawned.
pub fn spawn_ingest<L>(
    updates: Receiver<ItemUpdate>,
    shutdown: Receiver<()>,
    listener: L,
) -> std::io::Result<JoinHandle<()>>
where
    L: SubscriptionListener + 'static,
{
    thread::Builder::new()
        .name("isslive_ingest".into())
        .spawn(move || {
            listener.on_subscription();
            loop {
                select! {
                    recv(updates) -> msg => match msg {
                        Ok(update) => listener.on_item_update(&update),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => {
                        // updates already queued are still applied
                        let drained = updates.try_iter().map(|u| listener.on_item_update(&u)).count();
                        debug!(drained, "ingest shutdown requested");
                        break;
                    }
                }
            }
            listener.on_unsubscription();
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, never, unbounded};

    #[test]
    fn test_only_primary_field_is_ingested() {
        let store = Arc::new(LiveValueStore::new());
        let listener = StoreListener::new(store.clone());

        let mut update = ItemUpdate::value("USLAB000058", "758.2");
        update
            .fields
            .insert("TimeStamp".to_string(), "1234.5".to_string());
        listener.on_item_update(&update);
        listener.on_item_update(&ItemUpdate::new("USLAB000059", "Status", "24"));

        assert_eq!(store.value("USLAB000058").as_deref(), Some("758.2"));
        assert!(store.read("USLAB000059").is_none());
        assert_eq!(store.update_count(), 1);
    }

    #[test]
    fn test_custom_field() {
        let store = Arc::new(LiveValueStore::new());
        let listener = StoreListener::with_field(store.clone(), "Status");
        listener.on_item_update(&ItemUpdate::new("X", "Status", "24"));
        assert_eq!(store.value("X").as_deref(), Some("24"));
    }

    #[test]
    fn test_spawn_ingest_preserves_order() {
        let store = Arc::new(LiveValueStore::new());
        let (tx, rx) = unbounded();
        let handle = spawn_ingest(rx, never(), StoreListener::new(store.clone())).unwrap();

        for i in 0..1000 {
            tx.send(ItemUpdate::value("X", i.to_string())).unwrap();
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(store.value("X").as_deref(), Some("999"));
        assert_eq!(store.update_count(), 1000);
    }

    #[test]
    fn test_spawn_ingest_shutdown() {
        let store = Arc::new(LiveValueStore::new());
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = spawn_ingest(rx, shutdown_rx, StoreListener::new(store.clone())).unwrap();

        drop(shutdown_tx);
        handle.join().unwrap();
        // the worker dropped its receiver on exit
        assert!(tx.send(ItemUpdate::value("X", "1")).is_err());
        assert!(store.read("X").is_none());
    }

    #[test]
    fn test_listeners_fan_out() {
        let a = Arc::new(LiveValueStore::new());
        let b = Arc::new(LiveValueStore::new());
        let mut listeners = Listeners::default();
        listeners.push(Arc::new(StoreListener::new(a.clone())));
        listeners.push(Arc::new(StoreListener::new(b.clone())));

        listeners.on_item_update(&ItemUpdate::value("X", "1"));

        assert_eq!(listeners.len(), 2);
        assert_eq!(a.value("X").as_deref(), Some("1"));
        assert_eq!(b.value("X").as_deref(), Some("1"));
    }
}
