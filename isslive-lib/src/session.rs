use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time,
};

use chrono::{DateTime, Duration, Utc};
use crossbeam::channel::RecvTimeoutError;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Channel};
use crate::ingest::{ItemUpdate, StoreListener, SubscriptionListener};
use crate::store::{LiveValueStore, Sample};
use crate::transport::{ConnectionConfig, Subscription, Transport};
use crate::value::{FromValue, Value};
use crate::{Error, Result};

/// A decoded reading of one catalog channel.
#[derive(Debug, Clone, Serialize)]
pub struct Reading<'a> {
    pub channel: &'a Channel,
    /// `None` if no update has been received yet.
    pub value: Option<Value>,
    pub received: Option<DateTime<Utc>>,
}

/// Decode a raw sample the way the channel definition says to.
///
/// Channels with a decode table decode integer codes to status strings; all others are
/// coerced to their declared kind. Neither path fails: text that does not fit is returned as
/// [Value::Raw].
#[must_use]
pub fn decode_channel(channel: &Channel, raw: &str) -> Value {
    match channel.decode_table() {
        Some(table) => table.decode(raw),
        None => Value::coerce(channel.kind(), raw),
    }
}

/// A live telemetry session.
///
/// Owns the value store for one connection. Construct a session, [Session::connect] it to a
/// [Transport], then read channels by logical name from any number of threads.
///
/// # Example
/// ```
/// use isslive::{ItemUpdate, Session, Value};
///
/// let session = Session::default();
/// assert_eq!(session.get("cabin_pressure").unwrap(), None);
///
/// session.ingest(&ItemUpdate::value("USLAB000058", "758.2"));
/// assert_eq!(session.get("cabin_pressure").unwrap(), Some(Value::Float(758.2)));
///
/// // a typo is not the same as no data
/// assert!(session.get("cabin_presure").is_err());
/// ```
pub struct Session {
    catalog: Arc<Catalog>,
    store: Arc<LiveValueStore>,
    ready: AtomicBool,
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Catalog::default())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session{{channels: {}, values: {}, ready: {}}}",
            self.catalog.len(),
            self.store.len(),
            self.is_ready()
        )
    }
}

impl Session {
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self::with_catalog(Arc::new(catalog))
    }

    /// Create a session sharing an existing catalog.
    #[must_use]
    pub fn with_catalog(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            store: Arc::new(LiveValueStore::new()),
            ready: AtomicBool::new(false),
            transport: Mutex::new(None),
        }
    }

    /// The single subscription covering every catalog identifier for the configured field.
    #[must_use]
    pub fn subscription(&self, config: &ConnectionConfig) -> Subscription {
        let mut subscription = Subscription::new(
            config.mode,
            self.catalog.identifiers(),
            vec![config.field.clone()],
        );
        subscription.add_listener(Arc::new(StoreListener::with_field(
            self.store.clone(),
            config.field.clone(),
        )));
        subscription
    }

    /// Subscribe to every catalog channel and start `transport`.
    ///
    /// The session reports ready only after the transport accepted the subscription and
    /// connected.
    ///
    /// # Errors
    /// [Error::AlreadyConnected] if this session already has a transport, otherwise any
    /// error from the transport.
    pub fn connect<T>(&mut self, transport: T, config: &ConnectionConfig) -> Result<()>
    where
        T: Transport + 'static,
    {
        if self
            .transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
        {
            return Err(Error::AlreadyConnected);
        }
        let mut transport: Box<dyn Transport> = Box::new(transport);
        let subscription = self.subscription(config);
        debug!(
            server = config.server.as_str(),
            mode = %config.mode,
            items = subscription.items().len(),
            "subscribing"
        );
        transport.subscribe(subscription)?;
        transport.connect(config)?;

        *self
            .transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
        self.ready.store(true, Ordering::Release);
        info!(
            adapter_set = config.adapter_set.as_str(),
            channels = self.catalog.len(),
            "session ready"
        );
        Ok(())
    }

    /// Stop the transport. Values received so far remain readable.
    pub fn disconnect(&mut self) {
        let slot = self
            .transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut transport) = slot.take() {
            transport.disconnect();
            debug!(updates = self.store.update_count(), "session disconnected");
        }
        self.ready.store(false, Ordering::Release);
    }

    /// True once [Session::connect] has completed and until [Session::disconnect].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// True while the transport may still deliver updates.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| t.is_active())
    }

    /// Block until the transport stops delivering updates, e.g., a recording is exhausted.
    ///
    /// Returns false if the transport is still active after `timeout`. Returns true at once if
    /// the session is not connected.
    pub fn wait_idle(&self, timeout: time::Duration) -> bool {
        let done = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|t| t.completion());
        match done {
            Some(done) => !matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        }
    }

    /// Apply an update directly, bypassing any transport.
    pub fn ingest(&self, update: &ItemUpdate) {
        StoreListener::new(self.store.clone()).on_item_update(update);
    }

    fn resolve(&self, name: &str) -> Result<&Channel> {
        self.catalog.lookup(name).ok_or_else(|| {
            warn!(name, "channel name not found");
            Error::UnknownChannel(name.to_string())
        })
    }

    /// Decoded value of the channel `name`.
    ///
    /// Returns `Ok(None)` if the channel exists but no update has arrived yet.
    ///
    /// # Errors
    /// [Error::UnknownChannel] if `name` is not in the catalog.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        let channel = self.resolve(name)?;
        Ok(self
            .store
            .read(channel.id())
            .map(|sample| decode_channel(channel, &sample.value)))
    }

    /// Decoded value converted to `T`.
    ///
    /// `None` when the name is unknown, no value has arrived, or the value does not convert,
    /// e.g., raw passthrough text read as `f64`. Use [Session::get] to tell these apart.
    #[must_use]
    pub fn get_as<T: FromValue>(&self, name: &str) -> Option<T> {
        self.get(name).ok().flatten().and_then(T::from_value)
    }

    /// Raw sample of the channel `name`, exactly as received.
    ///
    /// # Errors
    /// [Error::UnknownChannel] if `name` is not in the catalog.
    pub fn raw(&self, name: &str) -> Result<Option<Arc<Sample>>> {
        let channel = self.resolve(name)?;
        Ok(self.store.read(channel.id()))
    }

    /// True if the channel has a value older than `max_age`.
    ///
    /// # Errors
    /// [Error::UnknownChannel] if `name` is not in the catalog.
    pub fn is_stale(&self, name: &str, max_age: Duration) -> Result<bool> {
        Ok(self
            .raw(name)?
            .is_some_and(|s| s.is_stale(Utc::now(), max_age)))
    }

    /// Read `channel` from the store.
    #[must_use]
    pub fn read<'a>(&self, channel: &'a Channel) -> Reading<'a> {
        let sample = self.store.read(channel.id());
        Reading {
            channel,
            value: sample.as_ref().map(|s| decode_channel(channel, &s.value)),
            received: sample.map(|s| s.received),
        }
    }

    /// Readings for every catalog channel, in catalog order.
    #[must_use]
    pub fn read_all(&self) -> Vec<Reading<'_>> {
        self.catalog.all().iter().map(|c| self.read(c)).collect()
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LiveValueStore> {
        &self.store
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::catalog::{ChannelDb, ChannelDef};
    use crate::transport::ChannelTransport;
    use crate::Kind;

    fn catalog() -> Catalog {
        let def = |name: &str, id: &str, kind: Kind, decode: Option<&str>| ChannelDef {
            name: name.to_string(),
            id: id.to_string(),
            kind,
            decode: decode.map(str::to_string),
            description: None,
            subsystem: None,
            unit: None,
        };
        Catalog::new(ChannelDb {
            version: "test".to_string(),
            decode_tables: BTreeMap::from([(
                "valve".to_string(),
                BTreeMap::from([(0, "CLOSED".to_string()), (1, "OPEN".to_string())]),
            )]),
            channels: vec![
                def("cabin_pressure", "USLAB000058", Kind::Float, None),
                def("o2_valve", "AIRLOCK000050", Kind::Status, Some("valve")),
                def("laptops_active", "USLAB000087", Kind::Integer, None),
                def("sm_docking_flag", "RUSSEG000012", Kind::Boolean, None),
                def("gmt_time", "TIME_000001", Kind::String, None),
            ],
            aliases: BTreeMap::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_cabin_pressure_scenario() {
        let session = Session::new(catalog());
        assert_eq!(session.get("cabin_pressure").unwrap(), None);

        session.store().update("USLAB000058", "758.2");
        assert_eq!(
            session.get("cabin_pressure").unwrap(),
            Some(Value::Float(758.2))
        );
        assert_eq!(session.get_as::<f64>("cabin_pressure"), Some(758.2));
    }

    #[test]
    fn test_decode_round_trip() {
        let session = Session::new(catalog());

        session.store().update("AIRLOCK000050", "0");
        assert_eq!(
            session.get("o2_valve").unwrap(),
            Some(Value::Status("CLOSED".into()))
        );

        session.store().update("AIRLOCK000050", "9");
        assert_eq!(session.get("o2_valve").unwrap(), Some(Value::Raw("9".into())));

        session.store().update("AIRLOCK000050", "1.0");
        assert_eq!(
            session.get("o2_valve").unwrap(),
            Some(Value::Raw("1.0".into()))
        );

        session.store().update("AIRLOCK000050", "bogus");
        assert_eq!(
            session.get("o2_valve").unwrap(),
            Some(Value::Raw("bogus".into()))
        );
    }

    #[test]
    fn test_unknown_name_is_distinct_from_absent() {
        let session = Session::new(catalog());

        assert!(matches!(
            session.get("nonexistent_name"),
            Err(Error::UnknownChannel(name)) if name == "nonexistent_name"
        ));
        assert!(matches!(session.get("laptops_active"), Ok(None)));
        assert!(matches!(session.raw("nonexistent_name"), Err(Error::UnknownChannel(_))));
        assert!(matches!(session.raw("laptops_active"), Ok(None)));
    }

    #[test]
    fn test_typed_kinds() {
        let session = Session::new(catalog());
        session.store().update("USLAB000087", "3");
        session.store().update("RUSSEG000012", "1");
        session.store().update("TIME_000001", "123.456");

        assert_eq!(session.get_as::<i64>("laptops_active"), Some(3));
        assert_eq!(session.get_as::<bool>("sm_docking_flag"), Some(true));
        assert_eq!(
            session.get("gmt_time").unwrap(),
            Some(Value::Raw("123.456".into()))
        );
    }

    #[test]
    fn test_malformed_values_pass_through() {
        let session = Session::new(catalog());
        session.store().update("USLAB000058", "OFFLINE");

        assert_eq!(
            session.get("cabin_pressure").unwrap(),
            Some(Value::Raw("OFFLINE".into()))
        );
        assert_eq!(session.get_as::<f64>("cabin_pressure"), None);
        assert_eq!(
            session.raw("cabin_pressure").unwrap().unwrap().value,
            "OFFLINE"
        );
    }

    #[test]
    fn test_connect_lifecycle() {
        let mut session = Session::new(catalog());
        assert!(!session.is_ready());

        let (transport, feed) = ChannelTransport::new();
        session
            .connect(transport, &ConnectionConfig::default())
            .unwrap();
        assert!(session.is_ready());

        let (again, _) = ChannelTransport::new();
        assert!(matches!(
            session.connect(again, &ConnectionConfig::default()),
            Err(Error::AlreadyConnected)
        ));

        feed.send(ItemUpdate::value("USLAB000087", "4")).unwrap();
        drop(feed);
        session.disconnect();

        assert!(!session.is_ready());
        assert!(!session.is_streaming());
        assert_eq!(session.get("laptops_active").unwrap(), Some(Value::Integer(4)));
    }

    #[test]
    fn test_wait_idle() {
        let mut session = Session::new(catalog());
        assert!(session.wait_idle(time::Duration::ZERO));

        let (transport, feed) = ChannelTransport::new();
        session
            .connect(transport, &ConnectionConfig::default())
            .unwrap();
        feed.send(ItemUpdate::value("USLAB000087", "7")).unwrap();
        assert!(!session.wait_idle(time::Duration::from_millis(20)));

        drop(feed);
        assert!(session.wait_idle(time::Duration::from_secs(10)));
        assert_eq!(session.get_as::<i64>("laptops_active"), Some(7));
    }

    #[test]
    fn test_subscription_covers_catalog() {
        let session = Session::new(catalog());
        let sub = session.subscription(&ConnectionConfig::default());

        assert_eq!(sub.items().len(), 5);
        assert_eq!(sub.fields(), &["Value".to_string()]);
        assert_eq!(sub.listeners().len(), 1);
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = Session::new(catalog());
        let b = Session::new(catalog());
        a.store().update("USLAB000058", "1.0");
        assert!(b.get("cabin_pressure").unwrap().is_none());
    }

    #[test]
    fn test_read_all() {
        let session = Session::new(catalog());
        session.ingest(&ItemUpdate::value("AIRLOCK000050", "1"));

        let readings = session.read_all();
        assert_eq!(readings.len(), 5);
        let valve = readings
            .iter()
            .find(|r| r.channel.name() == "o2_valve")
            .unwrap();
        assert_eq!(valve.value, Some(Value::Status("OPEN".into())));
        assert!(valve.received.is_some());
        assert!(readings
            .iter()
            .filter(|r| r.channel.name() != "o2_valve")
            .all(|r| r.value.is_none()));
    }

    #[test]
    fn test_staleness() {
        let session = Session::new(catalog());
        assert!(!session.is_stale("cabin_pressure", Duration::seconds(1)).unwrap());

        session
            .store()
            .update_at("USLAB000058", "1", Utc::now() - Duration::minutes(5));
        assert!(session.is_stale("cabin_pressure", Duration::seconds(1)).unwrap());
        assert!(!session.is_stale("cabin_pressure", Duration::hours(1)).unwrap());
    }
}
