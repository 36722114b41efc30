//! HTTP transport shared by queries and mutations.
//!
//! Every request runs through the same interceptor chain: request hooks just
//! before sending (bearer credential), response hooks exactly once per
//! received response (401 invalidation, 500 diagnostics).

use std::sync::Arc;

use crewnexus_shared::{bearer, join_url, ApiError, Method, PageParams, HEADER_AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::auth_session::SessionContext;

/// Options forwarded verbatim to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub page: Option<PageParams>,
}

impl RequestOptions {
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_page(mut self, page: PageParams) -> Self {
        self.page = Some(page);
        self
    }

    /// Query pairs including pagination, in send order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.query.clone();
        if let Some(page) = self.page {
            pairs.extend(page.to_query());
        }
        pairs
    }
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Validation(e.to_string()))?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_page(mut self, page: PageParams) -> Self {
        self.query.extend(page.to_query());
        self
    }

    pub fn with_options(mut self, options: &RequestOptions) -> Self {
        self.query.extend(options.query_pairs());
        self.headers.extend(options.headers.iter().cloned());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What response interceptors get to see.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta<'a> {
    pub method: Method,
    pub url: &'a str,
    pub status: u16,
    pub body: &'a str,
}

/// Cross-cutting request/response hook.
pub trait Interceptor: Send + Sync {
    fn on_request(&self, _request: &mut Request, _session: &SessionContext) {}

    fn on_response(&self, _response: &ResponseMeta<'_>, _session: &SessionContext) {}
}

/// Attaches the bearer credential; a 401 invalidates the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerAuth;

impl Interceptor for BearerAuth {
    fn on_request(&self, request: &mut Request, session: &SessionContext) {
        if let Some(token) = session.credential() {
            request.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(HEADER_AUTHORIZATION));
            request
                .headers
                .push((HEADER_AUTHORIZATION.to_string(), bearer(&token)));
        }
    }

    fn on_response(&self, response: &ResponseMeta<'_>, session: &SessionContext) {
        if response.status == 401 {
            tracing::warn!("{} {} returned 401, invalidating session", response.method, response.url);
            session.invalidate();
        }
    }
}

/// Logs server-side failures with the response body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerErrorLog;

impl Interceptor for ServerErrorLog {
    fn on_response(&self, response: &ResponseMeta<'_>, _session: &SessionContext) {
        if response.status == 500 {
            tracing::error!(
                "Server error on {} {}: {}",
                response.method,
                response.url,
                response.body
            );
        }
    }
}

struct ClientInner {
    http: Client,
    base_url: String,
    session: SessionContext,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

/// HTTP client for the pull channel.
///
/// Cheap to clone; all clones share the connection pool, session and
/// interceptors.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<ClientInner>,
}

impl TransportClient {
    /// Client with the built-in interceptors ([`BearerAuth`], [`ServerErrorLog`]).
    pub fn new(base_url: impl Into<String>, session: SessionContext) -> Self {
        Self::with_interceptors(
            base_url,
            session,
            vec![Arc::new(BearerAuth), Arc::new(ServerErrorLog)],
        )
    }

    pub fn with_interceptors(
        base_url: impl Into<String>,
        session: SessionContext,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http: Client::new(),
                base_url: base_url.into(),
                session,
                interceptors,
            }),
        }
    }

    /// Append an interceptor after the existing ones.
    pub fn with_interceptor(self, interceptor: Arc<dyn Interceptor>) -> Self {
        let mut interceptors = self.inner.interceptors.clone();
        interceptors.push(interceptor);
        Self::with_interceptors(self.inner.base_url.clone(), self.inner.session.clone(), interceptors)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.inner.base_url, path)
    }

    /// Send a request and return the decoded JSON body (`null` when empty).
    pub async fn execute(&self, mut request: Request) -> Result<Value, ApiError> {
        if request.path.trim().is_empty() {
            return Err(ApiError::Validation("request path is empty".to_string()));
        }

        let session = &self.inner.session;
        for interceptor in &self.inner.interceptors {
            interceptor.on_request(&mut request, session);
        }

        let url = self.url(&request.path);
        let mut rb = self
            .inner
            .http
            .request(to_reqwest(request.method), &url)
            .query(&request.query);
        for (name, value) in &request.headers {
            rb = rb.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            rb = rb.json(body);
        }

        let resp = rb.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        // A response was received; an unreadable body does not change its status
        let (text, read_error) = match resp.text().await {
            Ok(text) => (text, None),
            Err(e) => {
                tracing::warn!("Failed to read body of {} {}: {}", request.method, url, e);
                (String::new(), Some(e))
            }
        };

        let meta = ResponseMeta {
            method: request.method,
            url: &url,
            status,
            body: &text,
        };
        for interceptor in &self.inner.interceptors {
            interceptor.on_response(&meta, session);
        }

        if !is_success {
            return Err(ApiError::Response { status, body: text });
        }
        if let Some(e) = read_error {
            return Err(ApiError::Transport(format!("failed to read body: {e}")));
        }

        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
        }
    }

    /// Send a request and decode the body into `T`.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, ApiError> {
        let value = self.execute(request).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute_json(Request::get(path)).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute_json(Request::new(Method::Post, path).with_body(body)?).await
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute_json(Request::new(Method::Put, path).with_body(body)?).await
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute_json(Request::new(Method::Patch, path).with_body(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Request::delete(path)).await.map(|_| ())
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("base_url", &self.inner.base_url)
            .field("interceptors", &self.inner.interceptors.len())
            .finish()
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCredentialStore;
    use crate::auth_session::LoginRedirect;

    fn session(token: Option<&str>) -> SessionContext {
        let store = match token {
            Some(token) => MemoryCredentialStore::with_token(token),
            None => MemoryCredentialStore::new(),
        };
        SessionContext::new(Arc::new(store), Arc::new(LoginRedirect::default()))
    }

    #[test]
    fn bearer_reads_the_latest_credential() {
        let session = session(Some("first"));
        let mut request = Request::get("/api/agents").with_header("authorization", "stale");

        BearerAuth.on_request(&mut request, &session);
        assert_eq!(request.header("Authorization"), Some("Bearer first"));
        assert_eq!(request.headers.len(), 1);

        session.login("second");
        let mut request = Request::get("/api/agents");
        BearerAuth.on_request(&mut request, &session);
        assert_eq!(request.header("authorization"), Some("Bearer second"));
    }

    #[test]
    fn no_credential_no_header() {
        let mut request = Request::get("/api/agents");
        BearerAuth.on_request(&mut request, &session(None));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn only_401_invalidates() {
        let session = session(Some("t"));
        for status in [200, 403, 500] {
            let meta = ResponseMeta {
                method: Method::Get,
                url: "http://host/api",
                status,
                body: "",
            };
            BearerAuth.on_response(&meta, &session);
        }
        assert!(session.is_authenticated());

        let meta = ResponseMeta {
            method: Method::Get,
            url: "http://host/api",
            status: 401,
            body: "",
        };
        BearerAuth.on_response(&meta, &session);
        assert!(!session.is_authenticated());
        assert_eq!(session.invalidations(), 1);
    }

    #[test]
    fn options_append_pagination_last() {
        let options = RequestOptions::default()
            .with_query("status", "active")
            .with_page(PageParams::new(2, 50))
            .with_header("X-Trace", "1");
        let request = Request::get("/api/agents").with_options(&options);
        assert_eq!(
            request.query,
            vec![
                ("status".to_string(), "active".to_string()),
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
        assert_eq!(request.header("x-trace"), Some("1"));
    }

    #[tokio::test]
    async fn empty_path_is_rejected_before_io() {
        let client = TransportClient::new("http://127.0.0.1:9", session(None));
        let err = client.execute(Request::get("  ")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
