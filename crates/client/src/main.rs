//! crewnexus-monitor: follow the dashboard and, optionally, one workflow.
//!
//! ```text
//! crewnexus-monitor [workflow_id]
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crewnexus_shared::{ApiError, Decoded, PageInfo, PageParams};
use crewnexus_sync::{
    logging, ChannelHub, ConnectionState, CredentialStore, FileCredentialStore, LoginRedirect,
    MemoryCredentialStore, Query, QueryConfig, Request, SessionContext, Subscription, SyncConfig,
    TransportClient, TungsteniteConnector,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

const DASHBOARD_ENDPOINT: &str = "/api/monitoring/dashboard";
const DASHBOARD_REFRESH: Duration = Duration::from_secs(10);
const WORKFLOWS_ENDPOINT: &str = "/api/workflows/";

/// One page of the workflow list.
#[derive(Debug, Deserialize)]
struct WorkflowPage {
    #[serde(default)]
    workflows: Vec<Value>,
    #[serde(flatten)]
    info: PageInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("crewnexus_sync=debug,crewnexus_monitor=info");

    let config = SyncConfig::from_env();
    tracing::info!(
        "API at {}, push channel at {}",
        config.api_base_url(),
        config.ws_base_url()
    );

    let store: Arc<dyn CredentialStore> = match FileCredentialStore::new("session") {
        Some(store) => Arc::new(store),
        None => {
            tracing::warn!("No config directory, credential will not persist");
            Arc::new(MemoryCredentialStore::new())
        }
    };
    let redirect = Arc::new(LoginRedirect::new(config.login_path()));
    let session = SessionContext::new(store, redirect.clone());
    if let Ok(token) = std::env::var("CREWNEXUS_TOKEN") {
        session.login(&token);
    }
    if !session.is_authenticated() {
        tracing::warn!("No credential; protected endpoints will answer 401");
    }

    let client = TransportClient::new(config.api_base_url(), session.clone());
    match count_workflows(&client).await {
        Ok(count) => tracing::info!("{} workflow(s) known to the server", count),
        Err(err) => tracing::warn!("Could not list workflows: {}", err),
    }

    let dashboard: Query<Value> = Query::new(
        client,
        Some(DASHBOARD_ENDPOINT),
        QueryConfig::default().refetch_every(DASHBOARD_REFRESH),
    );
    let mut dashboard_rx = dashboard.subscribe();

    let hub = ChannelHub::new(
        config.ws_base_url(),
        config.reconnect_policy(),
        Arc::new(TungsteniteConnector),
    );
    let mut workflow: Option<Subscription<Value>> = std::env::args()
        .nth(1)
        .map(|id| hub.subscribe(&format!("monitoring/{id}")));
    let mut workflow_state = workflow.as_ref().map(|sub| sub.connection().watch_state());

    let mut login_rx = redirect.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            changed = dashboard_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = dashboard_rx.borrow_and_update().clone();
                match (&state.error, &state.data) {
                    (Some(err), _) => tracing::warn!("Dashboard refresh failed: {}", err),
                    (None, Some(data)) if !state.loading => tracing::info!("Dashboard: {}", data),
                    _ => {}
                }
            }
            Some(frame) = next_frame(&mut workflow) => {
                if frame.is_raw() {
                    tracing::info!("Workflow message: {}", frame.raw().unwrap_or_default());
                } else if let Some(value) = frame.value() {
                    tracing::info!("Workflow update: {}", value);
                }
            }
            Some(state) = next_state(&mut workflow_state) => {
                tracing::info!("Workflow channel {:?}", state);
            }
            Ok(()) = login_rx.changed() => {
                if let Some(route) = login_rx.borrow_and_update().clone() {
                    tracing::error!("Session expired, sign in again at {}", route);
                }
            }
        }
    }

    drop(workflow);
    hub.close_all();
    drop(dashboard);
    Ok(())
}

async fn count_workflows(client: &TransportClient) -> Result<usize, ApiError> {
    let mut params = PageParams::default();
    let mut count = 0;
    loop {
        let page: WorkflowPage = client
            .execute_json(Request::get(WORKFLOWS_ENDPOINT).with_page(params))
            .await?;
        if params.page > 1 && page.info.page != params.page {
            tracing::warn!("Server ignored page {}, stopping at {} workflow(s)", params.page, count);
            return Ok(count);
        }
        count += page.workflows.len();
        if !page.info.has_next() || page.workflows.is_empty() {
            return Ok(count);
        }
        params = params.next();
    }
}

async fn next_frame(
    subscription: &mut Option<Subscription<Value>>,
) -> Option<Decoded<Value>> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn next_state(
    rx: &mut Option<watch::Receiver<ConnectionState>>,
) -> Option<ConnectionState> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
