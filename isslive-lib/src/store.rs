use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError,
    },
};

use chrono::{DateTime, Duration, Utc};
use crossbeam::sync::ShardedLock;
use serde::Serialize;
use tracing::trace;

/// The most recent raw value received for a channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Raw text as delivered by upstream.
    pub value: String,
    /// When the update was applied to the store.
    pub received: DateTime<Utc>,
}

impl Sample {
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.received
    }

    /// True if the sample is older than `max_age` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

/// Cache of the latest raw value per upstream identifier.
///
/// Updates overwrite unconditionally and never validate the value. There is no delete; a
/// value is only ever replaced by a newer one. Each update swaps in a new immutable
/// [Sample], so a reader sees either the previous or the new sample, never a mix.
///
/// # Example
/// ```
/// use isslive::store::LiveValueStore;
///
/// let store = LiveValueStore::new();
/// assert!(store.read("USLAB000058").is_none());
///
/// store.update("USLAB000058", "758.2");
/// assert_eq!(store.value("USLAB000058").as_deref(), Some("758.2"));
/// ```
#[derive(Debug, Default)]
pub struct LiveValueStore {
    values: ShardedLock<HashMap<String, Arc<Sample>>>,
    updates: AtomicU64,
}

impl LiveValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value for `id`, stamped with the current time.
    pub fn update<V: Into<String>>(&self, id: &str, value: V) {
        self.update_at(id, value, Utc::now());
    }

    /// Overwrite the value for `id` with an explicit receive time.
    pub fn update_at<V: Into<String>>(&self, id: &str, value: V, received: DateTime<Utc>) {
        let sample = Arc::new(Sample {
            value: value.into(),
            received,
        });
        trace!(item = id, value = sample.value.as_str(), "update");

        // A panicking writer can only poison the lock between whole-sample swaps, so the
        // map is still consistent.
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = values.get_mut(id) {
            *slot = sample;
        } else {
            values.insert(id.to_string(), sample);
        }
        drop(values);

        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// The latest sample for `id`, or `None` if no update has been received.
    #[must_use]
    pub fn read(&self, id: &str) -> Option<Arc<Sample>> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// The latest raw value for `id`.
    #[must_use]
    pub fn value(&self, id: &str) -> Option<String> {
        self.read(id).map(|s| s.value.clone())
    }

    /// Point-in-time copy of every sample.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Arc<Sample>> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of identifiers with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of updates applied since creation.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_until_updated() {
        let store = LiveValueStore::new();
        assert!(store.read("X").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_writer_wins() {
        let store = LiveValueStore::new();
        store.update("X", "1");
        store.update("X", "2");
        store.update("Y", "a");

        assert_eq!(store.value("X").as_deref(), Some("2"));
        assert_eq!(store.value("Y").as_deref(), Some("a"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.update_count(), 3);
    }

    #[test]
    fn test_idempotent_update() {
        let store = LiveValueStore::new();
        store.update("X", "5");
        store.update("X", "5");
        assert_eq!(store.value("X").as_deref(), Some("5"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_values_are_not_validated() {
        let store = LiveValueStore::new();
        for v in ["", "NaN", "not a number", "   "] {
            store.update("X", v);
            assert_eq!(store.value("X").as_deref(), Some(v));
        }
    }

    #[test]
    fn test_staleness() {
        let store = LiveValueStore::new();
        let then = Utc::now() - Duration::seconds(30);
        store.update_at("X", "1", then);

        let sample = store.read("X").unwrap();
        let now = then + Duration::seconds(30);
        assert_eq!(sample.age(now), Duration::seconds(30));
        assert!(sample.is_stale(now, Duration::seconds(10)));
        assert!(!sample.is_stale(now, Duration::seconds(60)));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = LiveValueStore::new();
        store.update("X", "1");
        let snapshot = store.snapshot();
        store.update("X", "2");

        assert_eq!(snapshot["X"].value, "1");
        assert_eq!(store.value("X").as_deref(), Some("2"));
    }
}
