//! Push transport seam.
//!
//! The core never talks to the network itself. A [Transport] delivers [ItemUpdate]s for a
//! [Subscription] to its listeners; a real push client implements this trait, while
//! [ChannelTransport] and [ReplayTransport] cover in-process feeds and recorded sessions.
use std::{
    collections::HashSet,
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::ingest::{spawn_ingest, ItemUpdate, Listeners, SubscriptionListener, PRIMARY_FIELD};
use crate::{Error, Result};

pub const DEFAULT_SERVER: &str = "https://push.lightstreamer.com";
pub const DEFAULT_ADAPTER_SET: &str = "ISSLIVE";

/// Subscription mode requested from the push server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Only the latest state of each item is of interest.
    #[default]
    Merge,
    Distinct,
    Raw,
    Command,
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Merge => "MERGE",
            Mode::Distinct => "DISTINCT",
            Mode::Raw => "RAW",
            Mode::Command => "COMMAND",
        };
        f.write_str(s)
    }
}

/// Where and how to open a push session.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ConnectionConfig {
    /// Push server URL.
    #[builder(default = DEFAULT_SERVER.to_string(), setter(into))]
    pub server: String,
    /// Adapter set publishing the telemetry items.
    #[builder(default = DEFAULT_ADAPTER_SET.to_string(), setter(into))]
    pub adapter_set: String,
    #[builder(default)]
    pub mode: Mode,
    /// Field carrying each item's value.
    #[builder(default = PRIMARY_FIELD.to_string(), setter(into))]
    pub field: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A request for updates to a set of items and fields.
#[derive(Debug, Clone)]
pub struct Subscription {
    mode: Mode,
    items: Vec<String>,
    fields: Vec<String>,
    listeners: Listeners,
}

impl Subscription {
    #[must_use]
    pub fn new(mode: Mode, items: Vec<String>, fields: Vec<String>) -> Self {
        Self {
            mode,
            items,
            fields,
            listeners: Listeners::default(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SubscriptionListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }
}

/// A source of push notifications.
///
/// The expected call order is [Transport::subscribe] then [Transport::connect]; updates
/// may be delivered on a transport-owned thread as soon as `connect` returns.
pub trait Transport: Send {
    /// Register a subscription to be activated on connect.
    ///
    /// # Errors
    /// If the transport cannot accept the subscription.
    fn subscribe(&mut self, subscription: Subscription) -> Result<()>;

    /// Open the session and start delivering updates.
    ///
    /// # Errors
    /// If the session cannot be established.
    fn connect(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Stop delivering updates. Must be safe to call more than once.
    fn disconnect(&mut self);

    /// True while the transport may still deliver updates.
    fn is_active(&self) -> bool;

    /// A receiver that disconnects once the transport has delivered its last update, or
    /// `None` if it is not connected.
    fn completion(&self) -> Option<Receiver<()>>;
}

/// Routes notifications to a subscription's listeners, dropping items and fields that were
/// not subscribed.
struct Dispatch {
    items: HashSet<String>,
    fields: HashSet<String>,
    listeners: Listeners,
    // dropped with the dispatch when the worker exits
    done: Option<Sender<()>>,
}

impl Dispatch {
    fn new(subscription: Subscription) -> Self {
        Self {
            items: subscription.items.into_iter().collect(),
            fields: subscription.fields.into_iter().collect(),
            listeners: subscription.listeners,
            done: None,
        }
    }

    fn with_completion(mut self, done: Sender<()>) -> Self {
        self.done = Some(done);
        self
    }
}

impl SubscriptionListener for Dispatch {
    fn on_item_update(&self, update: &ItemUpdate) {
        if !self.items.contains(&update.item) {
            debug!(item = update.item.as_str(), "update for unsubscribed item");
            return;
        }
        if update.fields.keys().all(|k| self.fields.contains(k)) {
            self.listeners.on_item_update(update);
        } else {
            let mut update = update.clone();
            update.fields.retain(|k, _| self.fields.contains(k));
            self.listeners.on_item_update(&update);
        }
    }

    fn on_subscription(&self) {
        self.listeners.on_subscription();
    }

    fn on_unsubscription(&self) {
        self.listeners.on_unsubscription();
    }
}

/// Shared worker bookkeeping for the bundled transports.
#[derive(Default)]
struct Worker {
    subscription: Option<Subscription>,
    shutdown: Option<Sender<()>>,
    done: Option<Receiver<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        if self.subscription.is_some() || self.handle.is_some() {
            return Err(Error::Transport(
                "transport supports a single subscription".to_string(),
            ));
        }
        self.subscription = Some(subscription);
        Ok(())
    }

    fn take_subscription(&mut self) -> Result<Subscription> {
        if self.handle.is_some() {
            return Err(Error::Transport("transport already connected".to_string()));
        }
        self.subscription
            .take()
            .ok_or_else(|| Error::Transport("connect called without a subscription".to_string()))
    }

    fn stop(&mut self) {
        // dropping the sender disconnects the worker's shutdown receiver
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("transport worker panicked");
            }
        }
    }

    fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Dispatch for `subscription` whose drop signals completion to [Worker::completion].
    fn dispatch(&mut self, subscription: Subscription) -> Dispatch {
        let (done_tx, done_rx) = bounded(0);
        self.done = Some(done_rx);
        Dispatch::new(subscription).with_completion(done_tx)
    }

    fn completion(&self) -> Option<Receiver<()>> {
        self.done.clone()
    }
}

/// In-process transport fed through a channel.
///
/// Useful for embedding the core behind another push client, or in tests.
///
/// # Example
/// ```
/// use isslive::transport::{ChannelTransport, ConnectionConfig};
/// use isslive::{ItemUpdate, Session};
///
/// let (transport, feed) = ChannelTransport::new();
/// let mut session = Session::default();
/// session.connect(transport, &ConnectionConfig::default()).unwrap();
///
/// feed.send(ItemUpdate::value("USLAB000058", "758.2")).unwrap();
/// drop(feed);
/// session.disconnect();
///
/// assert_eq!(session.get("cabin_pressure").unwrap(), Some(isslive::Value::Float(758.2)));
/// ```
pub struct ChannelTransport {
    updates: Option<Receiver<ItemUpdate>>,
    worker: Worker,
}

impl ChannelTransport {
    /// Create a transport and the sender that feeds it.
    #[must_use]
    pub fn new() -> (Self, Sender<ItemUpdate>) {
        let (tx, rx) = unbounded();
        (
            Self {
                updates: Some(rx),
                worker: Worker::default(),
            },
            tx,
        )
    }
}

impl Transport for ChannelTransport {
    fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        self.worker.subscribe(subscription)
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        let subscription = self.worker.take_subscription()?;
        let Some(updates) = self.updates.take() else {
            return Err(Error::Transport("channel feed already consumed".to_string()));
        };
        debug!(
            adapter_set = config.adapter_set.as_str(),
            items = subscription.items().len(),
            "connecting channel feed"
        );
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let dispatch = self.worker.dispatch(subscription);
        let handle = spawn_ingest(updates, shutdown_rx, dispatch)?;
        self.worker.shutdown = Some(shutdown_tx);
        self.worker.handle = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.worker.stop();
    }

    fn is_active(&self) -> bool {
        self.worker.is_active()
    }

    fn completion(&self) -> Option<Receiver<()>> {
        self.worker.completion()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.worker.stop();
    }
}

/// Replays a recorded feed.
///
/// The recording holds one JSON [ItemUpdate] per line, e.g.,
/// `{"item": "USLAB000058", "fields": {"Value": "758.2"}}`. Blank lines are skipped; lines
/// that fail to parse are logged and skipped.
pub struct ReplayTransport<R> {
    reader: Option<R>,
    pace: Option<Duration>,
    worker: Worker,
}

impl<R> ReplayTransport<R>
where
    R: BufRead + Send + 'static,
{
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            pace: None,
            worker: Worker::default(),
        }
    }

    /// Wait `pace` between updates instead of replaying as fast as possible.
    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

impl ReplayTransport<BufReader<File>> {
    /// Replay the recording at `path`.
    ///
    /// # Errors
    /// If the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

fn replay<R: BufRead>(
    reader: R,
    pace: Option<Duration>,
    shutdown: &Receiver<()>,
    dispatch: &Dispatch,
) -> usize {
    let mut count = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(line = idx + 1, "failed to read recording: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let update: ItemUpdate = match serde_json::from_str(&line) {
            Ok(update) => update,
            Err(err) => {
                warn!(line = idx + 1, "skipping invalid update: {err}");
                continue;
            }
        };
        dispatch.on_item_update(&update);
        count += 1;

        let stop = match pace {
            Some(pace) => !matches!(shutdown.recv_timeout(pace), Err(RecvTimeoutError::Timeout)),
            None => !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)),
        };
        if stop {
            debug!("replay shutdown requested");
            break;
        }
    }
    count
}

impl<R> Transport for ReplayTransport<R>
where
    R: BufRead + Send + 'static,
{
    fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        self.worker.subscribe(subscription)
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        let subscription = self.worker.take_subscription()?;
        let Some(reader) = self.reader.take() else {
            return Err(Error::Transport("recording already replayed".to_string()));
        };
        info!(
            adapter_set = config.adapter_set.as_str(),
            items = subscription.items().len(),
            "replaying recorded feed"
        );
        let pace = self.pace;
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let dispatch = self.worker.dispatch(subscription);
        let handle = thread::Builder::new()
            .name("isslive_replay".into())
            .spawn(move || {
                dispatch.on_subscription();
                let count = replay(reader, pace, &shutdown_rx, &dispatch);
                debug!(count, "replay finished");
                dispatch.on_unsubscription();
            })?;
        self.worker.shutdown = Some(shutdown_tx);
        self.worker.handle = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.worker.stop();
    }

    fn is_active(&self) -> bool {
        self.worker.is_active()
    }

    fn completion(&self) -> Option<Receiver<()>> {
        self.worker.completion()
    }
}

impl<R> Drop for ReplayTransport<R> {
    fn drop(&mut self) {
        self.worker.stop();
    }
}
