//! One owned object wiring the OAuth client, session store and guard together.

use crate::client::{FlowState, OAuthClient};
use crate::config::OAuthConfig;
use crate::guard::TokenGuard;
use crate::navigator::Navigator;
use crate::pkce::PkceContext;
use crate::request;
use crate::retry::RefreshRetryPolicy;
use crate::session::{SessionStatus, SessionStore};
use fitdash_core::{AuthError, SharedStorage};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Session lifecycle for one user agent.
///
/// Create one per process (or per test) and pass it around; nothing here is
/// global.
pub struct SessionManager {
    client: Arc<OAuthClient>,
    store: Arc<SessionStore>,
    guard: TokenGuard,
    storage: SharedStorage,
}

impl SessionManager {
    /// Build a manager on session-scoped `storage`, restoring any session
    /// already in it.
    pub fn new(config: OAuthConfig, storage: SharedStorage) -> Self {
        let client = Arc::new(OAuthClient::new(config, storage.clone()));
        Self::from_client(client, storage)
    }

    /// Build a manager around an existing client.
    ///
    /// `storage` must be the same session-scoped store the client keeps its
    /// PKCE context in.
    pub fn from_client(client: Arc<OAuthClient>, storage: SharedStorage) -> Self {
        let store = Arc::new(SessionStore::rehydrate(storage.clone()));
        if store.is_authenticated() {
            client.set_state(FlowState::Authenticated);
        }
        let guard = TokenGuard::new(store.clone(), client.clone());
        Self {
            client,
            store,
            guard,
            storage,
        }
    }

    /// Use a custom retry policy for refreshes.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RefreshRetryPolicy) -> Self {
        self.guard = self.guard.with_retry_policy(retry);
        self
    }

    /// The OAuth client.
    pub fn client(&self) -> &Arc<OAuthClient> {
        &self.client
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The token guard.
    pub fn guard(&self) -> &TokenGuard {
        &self.guard
    }

    /// Start a login by navigating to the identity provider.
    pub fn login(&self, navigator: &dyn Navigator) -> Result<(), AuthError> {
        self.client.start_flow(navigator)
    }

    /// Finish a login from the provider's redirect URL.
    pub async fn complete_login(&self, callback_url: &str) -> Result<SessionStatus, AuthError> {
        let tokens = self.client.handle_callback(callback_url).await?;
        self.store.set_token_set(tokens)?;
        info!("Login complete");
        Ok(self.store.status())
    }

    /// End the session and forget any pending login.
    pub fn logout(&self) {
        self.guard.clear();
        if let Err(e) = PkceContext::discard(self.storage.as_ref()) {
            warn!(error = %e, "Failed to discard pending login");
        }
        self.client.set_state(FlowState::Idle);
        info!("Logged out");
    }

    /// Make sure the session holds a usable access token.
    pub async fn ensure_valid(&self) -> Result<(), AuthError> {
        self.guard.ensure_valid().await
    }

    /// Run `action` with a valid access token.
    ///
    /// See [`with_valid_session`](crate::with_valid_session).
    pub async fn with_valid_session<F, Fut, T, E>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AuthError>,
    {
        request::with_valid_session(&self.guard, action).await
    }

    /// Drop the session after the resource server rejected its token.
    pub fn invalidate(&self) {
        self.guard.invalidate();
        self.client.set_state(FlowState::Idle);
    }

    /// Drop the session after the resource server rejected `access_token`,
    /// unless the session has already moved on to a newer token.
    ///
    /// Returns whether the session was dropped.
    pub fn invalidate_token(&self, access_token: &str) -> bool {
        let cleared = self.guard.invalidate_token(access_token);
        if cleared {
            self.client.set_state(FlowState::Idle);
        }
        cleared
    }

    /// Session snapshot for display.
    pub fn status(&self) -> SessionStatus {
        self.store.status()
    }

    /// Whether an access token is held.
    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("client", &self.client)
            .field("guard", &self.guard)
            .finish()
    }
}
