//! Pull-based cached reads with optional polling.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crewnexus_shared::ApiError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::api_client::{Request, RequestOptions, TransportClient};
use crate::timers::TimerArena;

/// Observable state of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<ApiError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Configuration for a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    enabled: bool,
    refetch_interval: Option<Duration>,
    options: RequestOptions,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refetch_interval: None,
            options: RequestOptions::default(),
        }
    }
}

impl QueryConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Re-run the query every `period` while enabled.
    pub fn refetch_every(mut self, period: Duration) -> Self {
        self.refetch_interval = Some(period);
        self
    }

    /// Request options forwarded to the transport on every execution.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn refetch_interval(&self) -> Option<Duration> {
        self.refetch_interval
    }
}

/// Cache identity of a query: endpoint plus sorted query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl QueryKey {
    pub fn new(endpoint: &str, options: &RequestOptions) -> Self {
        let mut params = options.query_pairs();
        params.sort();
        Self {
            endpoint: endpoint.to_string(),
            params,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

struct Target {
    endpoint: Option<String>,
    enabled: bool,
}

impl Target {
    fn active_endpoint(&self) -> Option<&str> {
        match self.endpoint.as_deref() {
            Some(endpoint) if self.enabled && !endpoint.trim().is_empty() => Some(endpoint),
            _ => None,
        }
    }
}

struct QueryInner<T> {
    client: TransportClient,
    options: RequestOptions,
    target: Mutex<Target>,
    state: watch::Sender<QueryState<T>>,
    /// Sequence number of the most recently issued request.
    issued: AtomicU64,
    /// Sequence number of the most recently applied result.
    applied: AtomicU64,
}

impl<T> QueryInner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn request(&self) -> Option<Request> {
        let target = self.target.lock();
        target
            .active_endpoint()
            .map(|endpoint| Request::get(endpoint).with_options(&self.options))
    }

    fn begin(&self) -> u64 {
        let mut seq = 0;
        self.state.send_modify(|state| {
            seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            state.loading = true;
        });
        seq
    }

    /// Apply the result of request `seq`. Results older than the last applied
    /// one are dropped.
    fn apply(&self, seq: u64, result: Result<T, ApiError>) -> bool {
        self.state.send_if_modified(|state| {
            if seq <= self.applied.load(Ordering::SeqCst) {
                return false;
            }
            self.applied.store(seq, Ordering::SeqCst);
            match result {
                Ok(data) => {
                    state.data = Some(data);
                    state.error = None;
                }
                Err(err) => state.error = Some(err),
            }
            state.loading = seq < self.issued.load(Ordering::SeqCst);
            true
        })
    }

    /// Mark every outstanding request as stale.
    fn abandon(&self) {
        self.state.send_if_modified(|state| {
            let issued = self.issued.load(Ordering::SeqCst);
            self.applied.fetch_max(issued, Ordering::SeqCst);
            std::mem::replace(&mut state.loading, false)
        });
    }

    fn fetch(self: &Arc<Self>) -> bool {
        let Some(request) = self.request() else {
            return false;
        };
        let seq = self.begin();
        let client = self.client.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let path = request.path.clone();
            let result = client.execute_json::<T>(request).await;
            if let Err(err) = &result {
                tracing::warn!("Query {} failed: {}", path, err);
            }
            match weak.upgrade() {
                Some(inner) => {
                    if !inner.apply(seq, result) {
                        tracing::debug!("Discarded stale response #{} for {}", seq, path);
                    }
                }
                None => tracing::trace!("Query for {} dropped before response #{}", path, seq),
            }
        });
        true
    }
}

/// A cached, re-runnable read of a remote resource.
///
/// Executes on creation and whenever it is (re)enabled or pointed at a new
/// endpoint. With a refetch interval it polls until disabled or dropped.
/// Dropping the query cancels its polling timer; responses still in flight
/// are ignored.
pub struct Query<T> {
    inner: Arc<QueryInner<T>>,
    refetch_interval: Option<Duration>,
    timers: TimerArena,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Query<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create and mount the query. Must be called inside a tokio runtime.
    pub fn new(client: TransportClient, endpoint: Option<&str>, config: QueryConfig) -> Self {
        let owner = format!("query {}", endpoint.unwrap_or("<none>"));
        let query = Self {
            inner: Arc::new(QueryInner {
                client,
                options: config.options,
                target: Mutex::new(Target {
                    endpoint: endpoint.map(str::to_string),
                    enabled: config.enabled,
                }),
                state: watch::Sender::new(QueryState::default()),
                issued: AtomicU64::new(0),
                applied: AtomicU64::new(0),
            }),
            refetch_interval: config.refetch_interval,
            timers: TimerArena::new(owner),
            _marker: PhantomData,
        };
        query.mount();
        query
    }

    fn mount(&self) {
        self.timers.cancel_all();
        if !self.inner.fetch() {
            return;
        }
        if let Some(period) = self.refetch_interval {
            let weak: Weak<QueryInner<T>> = Arc::downgrade(&self.inner);
            self.timers.schedule_repeating(period, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.fetch();
                    }
                }
            });
        }
    }

    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn error(&self) -> Option<ApiError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// Run once now, independent of the polling schedule.
    ///
    /// Returns `false` when the query is disabled.
    pub fn refetch(&self) -> bool {
        self.inner.fetch()
    }

    /// Wait until no request is outstanding and return the resulting state.
    pub async fn settled(&self) -> QueryState<T> {
        let mut rx = self.inner.state.subscribe();
        let settled = rx.wait_for(|state| !state.loading).await.map(|state| state.clone());
        settled.unwrap_or_else(|_| self.state())
    }

    /// Point the query at a different endpoint; `None` or empty disables it.
    pub fn set_endpoint(&self, endpoint: Option<&str>) {
        {
            let mut target = self.inner.target.lock();
            if target.endpoint.as_deref() == endpoint {
                return;
            }
            target.endpoint = endpoint.map(str::to_string);
        }
        self.inner.abandon();
        self.mount();
    }

    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut target = self.inner.target.lock();
            if target.enabled == enabled {
                return;
            }
            target.enabled = enabled;
        }
        if enabled {
            self.mount();
        } else {
            self.timers.cancel_all();
            self.inner.abandon();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.target.lock().active_endpoint().is_some()
    }

    pub fn key(&self) -> Option<QueryKey> {
        let target = self.inner.target.lock();
        target
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(|endpoint| QueryKey::new(endpoint, &self.inner.options))
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.inner.target.lock();
        f.debug_struct("Query")
            .field("endpoint", &target.endpoint)
            .field("enabled", &target.enabled)
            .field("refetch_interval", &self.refetch_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_session::SessionContext;
    use crewnexus_shared::PageParams;

    fn client() -> TransportClient {
        // Nothing listens on the discard port.
        TransportClient::new("http://127.0.0.1:9", SessionContext::in_memory())
    }

    #[tokio::test]
    async fn results_apply_in_issue_order() {
        let query: Query<u32> = Query::new(client(), None, QueryConfig::default());
        let inner = &query.inner;

        let first = inner.begin();
        let second = inner.begin();
        assert!(query.is_loading());

        assert!(inner.apply(second, Ok(2)));
        assert!(!query.is_loading());
        assert!(!inner.apply(first, Ok(1)));

        assert_eq!(query.data(), Some(2));
    }

    #[tokio::test]
    async fn loading_holds_until_latest_request_lands() {
        let query: Query<u32> = Query::new(client(), None, QueryConfig::default());
        let inner = &query.inner;

        let first = inner.begin();
        let second = inner.begin();
        assert!(inner.apply(first, Ok(1)));
        assert!(query.is_loading());
        assert_eq!(query.data(), Some(1));

        assert!(inner.apply(second, Err(ApiError::Transport("down".into()))));
        let state = query.state();
        assert!(!state.loading);
        assert_eq!(state.data, Some(1));
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let query: Query<u32> = Query::new(client(), None, QueryConfig::default());
        let inner = &query.inner;

        let seq = inner.begin();
        inner.apply(seq, Err(ApiError::Transport("down".into())));
        let seq = inner.begin();
        inner.apply(seq, Ok(7));

        assert_eq!(query.state(), QueryState { data: Some(7), loading: false, error: None });
    }

    #[tokio::test]
    async fn missing_endpoint_issues_nothing() {
        let query: Query<u32> = Query::new(
            client(),
            Some(""),
            QueryConfig::default().refetch_every(Duration::from_secs(1)),
        );
        assert!(!query.is_enabled());
        assert!(!query.refetch());
        assert_eq!(query.pending_timers(), 0);
        assert_eq!(query.state(), QueryState::default());
    }

    #[tokio::test]
    async fn disabling_abandons_in_flight_results() {
        let query: Query<u32> = Query::new(client(), None, QueryConfig::default());
        let seq = query.inner.begin();

        query.set_endpoint(Some("/api/agents"));
        query.set_enabled(false);
        assert!(!query.is_loading());
        assert!(!query.inner.apply(seq, Ok(1)));
        assert_eq!(query.data(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_leaves_the_polling_cadence_alone() {
        let query: Query<u32> = Query::new(
            client(),
            Some("/api/agents"),
            QueryConfig::default().refetch_every(Duration::from_secs(10)),
        );
        let issued = || query.inner.issued.load(Ordering::SeqCst);
        assert_eq!(issued(), 1);
        assert_eq!(query.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(query.refetch());
        assert_eq!(issued(), 2);
        assert_eq!(query.pending_timers(), 1);

        // ticks stay on the 10s grid set at mount
        tokio::time::sleep(Duration::from_millis(5_900)).await;
        assert_eq!(issued(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(issued(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(issued(), 4);
        assert_eq!(query.pending_timers(), 1);
    }

    #[test]
    fn key_sorts_params() {
        let options = RequestOptions::default()
            .with_query("status", "active")
            .with_page(PageParams::new(2, 20));
        let key = QueryKey::new("/api/agents", &options);
        assert_eq!(key.to_string(), "/api/agents?limit=20&page=2&status=active");
        assert_eq!(
            key,
            QueryKey::new(
                "/api/agents",
                &RequestOptions::default()
                    .with_page(PageParams::new(2, 20))
                    .with_query("status", "active"),
            )
        );
    }
}
