mod common;

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::{harness, serve};
use crewnexus_shared::{ApiError, Method};
use crewnexus_sync::Mutation;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize)]
struct NewAgent<'a> {
    name: &'a str,
}

#[derive(Debug, PartialEq, Deserialize)]
struct Agent {
    id: String,
    name: String,
}

async fn create_agent(Json(body): Json<serde_json::Value>) -> Response {
    tokio::time::sleep(Duration::from_millis(100)).await;
    match body["name"].as_str() {
        Some(name) if !name.is_empty() => (
            StatusCode::CREATED,
            Json(json!({ "id": "42", "name": name })),
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "name is required" })),
        )
            .into_response(),
    }
}

fn app() -> Router {
    Router::new().route("/api/agents", post(create_agent))
}

#[tokio::test]
async fn create_then_reject_invalid_payload() {
    let addr = serve(app()).await;
    let h = harness(addr, Some("t"));
    let mutation: Mutation<Agent> = Mutation::new(h.client, Method::Post, "/api/agents").unwrap();

    let agent = mutation.mutate(&NewAgent { name: "X" }).await.unwrap();
    assert_eq!(
        agent,
        Agent {
            id: "42".to_string(),
            name: "X".to_string()
        }
    );
    assert_eq!(mutation.error(), None);

    let err = mutation.mutate(&NewAgent { name: "" }).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.detail().as_deref(), Some("name is required"));

    let state = mutation.state();
    assert!(!state.loading);
    assert_eq!(state.error, Some(err));

    mutation.mutate(&NewAgent { name: "Y" }).await.unwrap();
    assert_eq!(mutation.error(), None);
}

#[tokio::test]
async fn loading_spans_the_whole_call() {
    let addr = serve(app()).await;
    let h = harness(addr, None);
    let mutation: Mutation<Agent> = Mutation::new(h.client, Method::Post, "/api/agents").unwrap();
    assert!(!mutation.is_loading());

    let valid = NewAgent { name: "X" };
    let invalid = NewAgent { name: "" };

    let (ok, seen_loading) = tokio::join!(mutation.mutate(&valid), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        mutation.is_loading()
    });
    assert!(ok.is_ok());
    assert!(seen_loading);
    assert!(!mutation.is_loading());

    let (err, seen_loading) = tokio::join!(mutation.mutate(&invalid), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        mutation.is_loading()
    });
    assert!(matches!(err, Err(ApiError::Response { status: 400, .. })));
    assert!(seen_loading);
    assert!(!mutation.is_loading());
}
