//! Topic subscriptions over shared, reference-counted connections.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crewnexus_shared::{join_url, Decoded, Outgoing, SendError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use super::connection::{Connection, ConnectionState, Connector, Frame, ReconnectPolicy};

/// Normalize a topic path for use as a key (no surrounding slashes)
pub fn normalize_topic(topic: &str) -> String {
    topic.trim_matches('/').to_string()
}

struct HubInner {
    base_address: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Weak<Connection>>>,
}

/// Registry of topic connections under one push base address.
///
/// Subscribers to the same topic share a connection. A connection lives as
/// long as at least one [`Subscription`] to it does.
#[derive(Clone)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

impl ChannelHub {
    pub fn new(base_address: impl Into<String>, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                base_address: base_address.into(),
                policy,
                connector,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Full address for a topic.
    pub fn address_for(&self, topic: &str) -> String {
        join_url(&self.inner.base_address, &normalize_topic(topic))
    }

    /// Subscribe to a topic, opening its connection if none is live.
    pub fn subscribe<T: DeserializeOwned>(&self, topic: &str) -> Subscription<T> {
        let topic = normalize_topic(topic);
        let mut connections = self.inner.connections.lock();
        connections.retain(|_, weak| weak.strong_count() > 0);

        let connection = match connections.get(&topic).and_then(Weak::upgrade) {
            Some(connection) => {
                tracing::debug!("Reusing connection for topic '{}'", topic);
                connection
            }
            None => {
                let address = join_url(&self.inner.base_address, &topic);
                tracing::info!("Creating connection for topic '{}' at {}", topic, address);
                let connection = Arc::new(Connection::connect(
                    address,
                    self.inner.policy.clone(),
                    self.inner.connector.clone(),
                ));
                connections.insert(topic.clone(), Arc::downgrade(&connection));
                connection
            }
        };

        Subscription {
            frames: connection.subscribe(),
            topic,
            connection,
            _marker: PhantomData,
        }
    }

    /// Topics with at least one live subscriber.
    pub fn topics(&self) -> Vec<String> {
        let connections = self.inner.connections.lock();
        let mut topics: Vec<String> = connections
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Close every live connection (used during logout).
    ///
    /// Existing subscriptions stay valid but report `Closed` until reopened.
    pub fn close_all(&self) {
        let live: Vec<Arc<Connection>> = self
            .inner
            .connections
            .lock()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        for connection in live {
            connection.close();
        }
    }
}

impl std::fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHub")
            .field("base_address", &self.inner.base_address)
            .field("topics", &self.topics())
            .finish()
    }
}

/// A typed view of one topic.
pub struct Subscription<T> {
    topic: String,
    connection: Arc<Connection>,
    frames: watch::Receiver<Option<Frame>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn address(&self) -> &str {
        self.connection.address()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The latest message, decoded into `T` or surfaced raw.
    pub fn latest(&self) -> Option<Decoded<T>> {
        self.frames.borrow().as_ref().map(Frame::decode)
    }

    /// Wait for the next message.
    ///
    /// Messages that arrive while nobody is waiting are overwritten by newer
    /// ones. Returns `None` only once the connection is gone.
    pub async fn next(&mut self) -> Option<Decoded<T>> {
        loop {
            self.frames.changed().await.ok()?;
            if let Some(frame) = self.frames.borrow_and_update().as_ref() {
                return Some(frame.decode());
            }
        }
    }

    pub fn send(&self, payload: impl Into<Outgoing>) -> Result<(), SendError> {
        self.connection.send(payload)
    }

    pub fn send_json<P: Serialize + ?Sized>(&self, payload: &P) -> Result<(), SendError> {
        self.connection.send_json(payload)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("connection", &self.connection)
            .finish()
    }
}
