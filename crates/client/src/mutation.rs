//! One-shot writes.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crewnexus_shared::{ApiError, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::api_client::{Request, RequestOptions, TransportClient};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
    pub loading: bool,
    pub error: Option<ApiError>,
}

/// Marks one call as in flight for as long as it is alive.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    state: &'a watch::Sender<MutationState>,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, state: &'a watch::Sender<MutationState>) -> Self {
        state.send_modify(|s| {
            count.fetch_add(1, Ordering::SeqCst);
            s.loading = true;
        });
        Self { count, state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            let remaining = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
            s.loading = remaining > 0;
        });
    }
}

/// A write of `method` against a fixed endpoint, decoding the response as `T`.
pub struct Mutation<T> {
    client: TransportClient,
    method: Method,
    endpoint: String,
    in_flight: AtomicUsize,
    state: watch::Sender<MutationState>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Mutation<T> {
    pub fn new(
        client: TransportClient,
        method: Method,
        endpoint: impl Into<String>,
    ) -> Result<Self, ApiError> {
        if !method.is_mutation() {
            return Err(ApiError::Validation(format!(
                "{method} is not a mutation method"
            )));
        }
        Ok(Self {
            client,
            method,
            endpoint: endpoint.into(),
            in_flight: AtomicUsize::new(0),
            state: watch::Sender::new(MutationState::default()),
            _marker: PhantomData,
        })
    }

    /// Send `payload` and return the decoded response.
    ///
    /// Failures are recorded in [`MutationState::error`] and returned.
    pub async fn mutate<B: Serialize + ?Sized>(&self, payload: &B) -> Result<T, ApiError> {
        self.mutate_with(payload, &RequestOptions::default()).await
    }

    pub async fn mutate_with<B: Serialize + ?Sized>(
        &self,
        payload: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let _guard = InFlight::enter(&self.in_flight, &self.state);

        let result = match self.request(payload, options) {
            Ok(request) => self.client.execute_json::<T>(request).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => {
                self.state.send_if_modified(|s| s.error.take().is_some());
            }
            Err(err) => {
                tracing::warn!("{} {} failed: {}", self.method, self.endpoint, err);
                let err = err.clone();
                self.state.send_modify(|s| s.error = Some(err));
            }
        }
        result
    }

    fn request<B: Serialize + ?Sized>(
        &self,
        payload: &B,
        options: &RequestOptions,
    ) -> Result<Request, ApiError> {
        let request = Request::new(self.method, self.endpoint.as_str()).with_options(options);
        let body = serde_json::to_value(payload).map_err(|e| ApiError::Validation(e.to_string()))?;
        if body == Value::Null {
            Ok(request)
        } else {
            Ok(Request { body: Some(body), ..request })
        }
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<ApiError> {
        self.state.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<T> std::fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
