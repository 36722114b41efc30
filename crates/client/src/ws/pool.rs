//! Aggregation of independent connections behind one status surface.

use std::sync::Arc;

use crewnexus_shared::{ConnectionError, Outgoing, SendError};
use futures_util::future::select_all;

use super::connection::{Connection, Connector, ReconnectPolicy};

/// Combined status of every member connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub all_connected: bool,
    pub any_error: bool,
}

/// N independent connections, one per address.
///
/// Members share nothing but this aggregation surface: each keeps its own
/// state machine, retry budget and timers.
#[derive(Debug)]
pub struct ConnectionPool {
    members: Vec<Connection>,
}

impl ConnectionPool {
    /// Open one connection per address.
    pub fn open<I, S>(addresses: I, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = addresses
            .into_iter()
            .map(|address| Connection::connect(address, policy.clone(), connector.clone()))
            .collect();
        Self { members }
    }

    pub fn members(&self) -> &[Connection] {
        &self.members
    }

    pub fn get(&self, address: &str) -> Option<&Connection> {
        self.members.iter().find(|c| c.address() == address)
    }

    /// True iff every member is `Open`.
    pub fn all_connected(&self) -> bool {
        self.members.iter().all(Connection::is_connected)
    }

    /// True iff any member has a non-empty error slot.
    pub fn any_error(&self) -> bool {
        self.members.iter().any(|c| c.error().is_some())
    }

    pub fn errors(&self) -> Vec<(String, ConnectionError)> {
        self.members
            .iter()
            .filter_map(|c| c.error().map(|e| (c.address().to_string(), e)))
            .collect()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            all_connected: self.all_connected(),
            any_error: self.any_error(),
        }
    }

    /// Resolves on the next state change of any member.
    pub async fn changed(&self) {
        if self.members.is_empty() {
            return futures_util::future::pending().await;
        }
        let waits = self.members.iter().map(|c| {
            let mut states = c.watch_state();
            Box::pin(async move {
                let _ = states.changed().await;
            })
        });
        select_all(waits).await;
    }

    /// Best-effort broadcast. Each member is attempted independently.
    pub fn send_all(&self, payload: impl Into<Outgoing>) -> Vec<(String, Result<(), SendError>)> {
        let payload = payload.into();
        self.members
            .iter()
            .map(|c| (c.address().to_string(), c.send(payload.clone())))
            .collect()
    }

    /// Close every member. No reconnect timer survives this call.
    pub fn close_all(&self) {
        for member in &self.members {
            member.close();
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.members.iter().map(Connection::pending_timers).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::testing::ScriptedConnector;
    use crate::ws::ConnectionState;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn partial_pool_reports_member_errors_and_still_broadcasts() {
        let connector = ScriptedConnector::accepting_only(&["ws://host/ws/agents"]);
        let pool = ConnectionPool::open(
            ["ws://host/ws/agents", "ws://host/ws/workflows"],
            ReconnectPolicy {
                reconnect: true,
                interval_ms: 1000,
                max_attempts: 3,
            },
            connector.clone(),
        );

        let mut open = pool.get("ws://host/ws/agents").unwrap().watch_state();
        open.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let status = pool.status();
        assert!(!status.all_connected);
        assert!(status.any_error);
        let errors = pool.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "ws://host/ws/workflows");

        let mut peer = connector.take_peer_for("ws://host/ws/agents").unwrap();
        let outcomes = pool.send_all("refresh");
        assert_eq!(
            outcomes,
            vec![
                ("ws://host/ws/agents".to_string(), Ok(())),
                ("ws://host/ws/workflows".to_string(), Err(SendError::NotConnected)),
            ]
        );
        assert_eq!(peer.from_client.next().await.as_deref(), Some("refresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_leaves_no_timers() {
        let connector = ScriptedConnector::refusing();
        let pool = ConnectionPool::open(
            ["ws://a/ws", "ws://b/ws", "ws://c/ws"],
            ReconnectPolicy::default(),
            connector.clone(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.pending_timers(), 3);

        pool.close_all();
        assert_eq!(pool.pending_timers(), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_fires_when_a_member_opens() {
        let connector = ScriptedConnector::accepting();
        let pool = ConnectionPool::open(["ws://a/ws", "ws://b/ws"], ReconnectPolicy::default(), connector);

        while !pool.all_connected() {
            pool.changed().await;
        }
        assert_eq!(
            pool.status(),
            PoolStatus {
                all_connected: true,
                any_error: false
            }
        );
    }
}
