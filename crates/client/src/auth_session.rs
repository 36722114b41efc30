//! Session context: the credential slot and what happens when it goes stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::storage::{CredentialStore, MemoryCredentialStore};

/// Where the presentation layer is sent when the session is invalidated.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Navigator that publishes the requested route for the UI to follow.
#[derive(Debug)]
pub struct LoginRedirect {
    path: String,
    route: watch::Sender<Option<String>>,
}

impl LoginRedirect {
    pub fn new(path: impl Into<String>) -> Self {
        let (route, _) = watch::channel(None);
        Self {
            path: path.into(),
            route,
        }
    }

    /// Receiver of the last requested route (`None` until the first redirect).
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.route.subscribe()
    }

    pub fn requested(&self) -> Option<String> {
        self.route.borrow().clone()
    }
}

impl Default for LoginRedirect {
    fn default() -> Self {
        Self::new("/login")
    }
}

impl Navigator for LoginRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!("Session invalidated, navigating to {}", self.path);
        self.route.send_replace(Some(self.path.clone()));
    }
}

/// Shared, injectable credential context.
///
/// Every component that needs the credential holds a clone of this context
/// instead of reading a global. Invalidation through any clone is visible to
/// all of them.
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    invalidations: Arc<AtomicU64>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn CredentialStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            navigator,
            invalidations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// In-memory session that redirects to `/login`.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(LoginRedirect::default()),
        )
    }

    /// The current credential, read fresh on every call.
    pub fn credential(&self) -> Option<String> {
        self.store.load()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }

    pub fn login(&self, token: &str) {
        if !self.store.save(token) {
            tracing::error!("Failed to persist credential");
        }
    }

    /// Clear the credential without navigating.
    pub fn logout(&self) {
        self.store.remove();
    }

    /// Clear the credential and force navigation to the login surface.
    ///
    /// Returns `true` if a credential was actually cleared.
    pub fn invalidate(&self) -> bool {
        let cleared = self.store.remove();
        if cleared {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
        self.navigator.redirect_to_login();
        cleared
    }

    /// How many times a present credential was cleared by invalidation.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .field("invalidations", &self.invalidations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_clears_once_and_always_navigates() {
        let redirect = Arc::new(LoginRedirect::new("/signin"));
        let session = SessionContext::new(
            Arc::new(MemoryCredentialStore::with_token("t")),
            redirect.clone(),
        );
        let observer = session.clone();

        assert!(session.invalidate());
        assert!(!observer.invalidate());
        assert_eq!(observer.invalidations(), 1);
        assert!(!observer.is_authenticated());
        assert_eq!(redirect.requested().as_deref(), Some("/signin"));
    }

    #[test]
    fn logout_does_not_navigate() {
        let redirect = Arc::new(LoginRedirect::default());
        let session = SessionContext::new(Arc::new(MemoryCredentialStore::new()), redirect.clone());
        session.login("t");
        assert_eq!(session.credential().as_deref(), Some("t"));
        session.logout();
        assert!(!session.is_authenticated());
        assert_eq!(redirect.requested(), None);
    }
}
