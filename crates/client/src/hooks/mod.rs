//! Dioxus bindings for the sync layer.
//!
//! Each hook subscribes once, on first render, and mirrors the latest value
//! into a signal so components re-render on change.

use dioxus::prelude::*;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::mutation::{Mutation, MutationState};
use crate::query::{Query, QueryState};
use crate::ws::{Connection, ConnectionState};

/// Mirror a `watch` receiver into a signal.
///
/// `receiver` is only called on the first render.
pub fn use_watch<T>(receiver: impl FnOnce() -> watch::Receiver<T>) -> Signal<T>
where
    T: Clone + 'static,
{
    let rx = use_hook(receiver);
    let initial = rx.clone();
    let mut value = use_signal(move || initial.borrow().clone());
    use_future(move || {
        let mut rx = rx.clone();
        async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                value.set(next);
            }
        }
    });
    value
}

pub fn use_query_state<T>(query: &Query<T>) -> Signal<QueryState<T>>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    use_watch(|| query.subscribe())
}

pub fn use_mutation_state<T: DeserializeOwned>(mutation: &Mutation<T>) -> Signal<MutationState> {
    use_watch(|| mutation.subscribe())
}

pub fn use_connection_state(connection: &Connection) -> Signal<ConnectionState> {
    use_watch(|| connection.watch_state())
}
