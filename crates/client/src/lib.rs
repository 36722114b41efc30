//! CrewNexus sync client.
//!
//! The data layer behind the CrewNexus dashboard: reconnecting push channels
//! for live workflow monitoring, and cached, polled pull queries plus
//! mutations over the REST API. Both share one [`SessionContext`], so a 401
//! anywhere signs the whole client out.

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod storage;
pub mod timers;
pub mod ws;

#[cfg(feature = "dioxus")]
pub mod hooks;

pub use api_client::{
    BearerAuth, Interceptor, Request, RequestOptions, ResponseMeta, ServerErrorLog,
    TransportClient,
};
pub use auth_session::{LoginRedirect, Navigator, SessionContext};
pub use config::SyncConfig;
pub use mutation::{Mutation, MutationState};
pub use query::{Query, QueryConfig, QueryKey, QueryState};
pub use storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use timers::{TimerArena, TimerId};
pub use ws::{
    ChannelHub, Connection, ConnectionPool, ConnectionState, Frame, PoolStatus, ReconnectPolicy,
    Subscription, TungsteniteConnector,
};
