//! Push channel: reconnecting connections, pools and topic subscriptions.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    ChannelHub                      │
//! │   (topic → shared Connection, refcounted by subs)  │
//! └────────────────────────────────────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ Connection │ │ Connection │ │ Connection │
//!   │ (topic A)  │ │ (topic B)  │ │ (topic C)  │
//!   └────────────┘ └────────────┘ └────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//!    Subscription<T>  Subscription<T>  Subscription<T>
//!    (decoded or raw latest value, newest wins)
//! ```
//!
//! A [`ConnectionPool`] groups connections that are managed together and only
//! adds an aggregated status and broadcast send on top.

pub mod channel;
pub mod connection;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{normalize_topic, ChannelHub, Subscription};
pub use connection::{
    Connection, ConnectionState, Connector, Frame, FrameSink, FrameStream, ReconnectPolicy, Session,
    TungsteniteConnector,
};
pub use pool::{ConnectionPool, PoolStatus};
