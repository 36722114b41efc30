#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use crewnexus_sync::{LoginRedirect, MemoryCredentialStore, SessionContext, TransportClient};
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct Harness {
    pub client: TransportClient,
    pub session: SessionContext,
    pub redirect: Arc<LoginRedirect>,
}

pub fn harness(addr: SocketAddr, token: Option<&str>) -> Harness {
    let store = match token {
        Some(token) => MemoryCredentialStore::with_token(token),
        None => MemoryCredentialStore::new(),
    };
    let redirect = Arc::new(LoginRedirect::default());
    let session = SessionContext::new(Arc::new(store), redirect.clone());
    let client = TransportClient::new(format!("http://{addr}"), session.clone());
    Harness {
        client,
        session,
        redirect,
    }
}

pub async fn within<F: std::future::Future>(secs: u64, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("timed out")
}
