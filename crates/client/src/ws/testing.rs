//! In-process connector for driving connections deterministically in tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crewnexus_shared::ConnectionError;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::connection::{Connector, Session};

/// The server side of an accepted session. Dropping it closes the session.
pub(crate) struct Peer {
    pub address: String,
    to_client: UnboundedSender<Result<String, ConnectionError>>,
    pub from_client: UnboundedReceiver<String>,
}

impl Peer {
    pub fn push(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ConnectionError::Transport(message.to_string())));
    }
}

pub(crate) struct ScriptedConnector {
    accepting: AtomicBool,
    only: Option<HashSet<String>>,
    attempts: Mutex<Vec<(String, Instant)>>,
    peers: Mutex<VecDeque<Peer>>,
}

impl ScriptedConnector {
    fn build(accepting: bool, only: Option<HashSet<String>>) -> Arc<Self> {
        Arc::new(Self {
            accepting: AtomicBool::new(accepting),
            only,
            attempts: Mutex::new(Vec::new()),
            peers: Mutex::new(VecDeque::new()),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Self::build(false, None)
    }

    pub fn accepting() -> Arc<Self> {
        Self::build(true, None)
    }

    /// Accept handshakes for the listed addresses only.
    pub fn accepting_only(addresses: &[&str]) -> Arc<Self> {
        Self::build(true, Some(addresses.iter().map(|a| a.to_string()).collect()))
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn attempts_for(&self, address: &str) -> usize {
        self.attempts.lock().iter().filter(|(a, _)| a == address).count()
    }

    /// Oldest accepted session not yet taken.
    pub fn take_peer(&self) -> Option<Peer> {
        self.peers.lock().pop_front()
    }

    pub fn take_peer_for(&self, address: &str) -> Option<Peer> {
        let mut peers = self.peers.lock();
        let index = peers.iter().position(|p| p.address == address)?;
        peers.remove(index)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, address: &str) -> Result<Session, ConnectionError> {
        self.attempts.lock().push((address.to_string(), Instant::now()));

        let allowed = self.only.as_ref().map_or(true, |only| only.contains(address));
        if !self.accepting.load(Ordering::SeqCst) || !allowed {
            return Err(ConnectionError::Handshake(format!("{address} refused the handshake")));
        }

        let (to_server, from_client) = unbounded::<String>();
        let (to_client, from_server) = unbounded::<Result<String, ConnectionError>>();
        self.peers.lock().push_back(Peer {
            address: address.to_string(),
            to_client,
            from_client,
        });

        let sink = to_server.sink_map_err(|e| ConnectionError::Transport(e.to_string()));
        Ok(Session::new(sink, from_server))
    }
}
