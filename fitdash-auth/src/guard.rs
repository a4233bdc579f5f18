//! Token guard: keeps the session's access token usable.
//!
//! Concurrent callers that find the token expired share one refresh. The
//! in-flight refresh lives in a mutex-guarded slot as a [`Shared`] future
//! tagged with the session generation it was started for. Callers join it
//! only while the session is still at that generation, and the refreshed
//! tokens are committed only if nothing replaced or cleared the session
//! in the meantime.

use crate::retry::RefreshRetryPolicy;
use crate::session::SessionStore;
use crate::TokenEndpoint;
use fitdash_core::{AuthError, TokenSet};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenSet, AuthError>>>;

struct InFlight {
    id: u64,
    generation: u64,
    refresh: SharedRefresh,
}

type RefreshSlot = Arc<Mutex<Option<InFlight>>>;

/// Refreshes expired tokens through a [`TokenEndpoint`], at most one at a time.
pub struct TokenGuard {
    store: Arc<SessionStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    retry: RefreshRetryPolicy,
    in_flight: RefreshSlot,
    next_id: AtomicU64,
}

impl TokenGuard {
    /// Create a guard over `store` refreshing through `endpoint`.
    pub fn new(store: Arc<SessionStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            retry: RefreshRetryPolicy::default(),
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Use a custom retry policy for transient refresh failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RefreshRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The guarded session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Whether the held access token needs a refresh.
    ///
    /// True with no session, no recorded expiry, or less than
    /// [`EXPIRY_SKEW_SECS`](fitdash_core::EXPIRY_SKEW_SECS) left.
    pub fn is_expired(&self) -> bool {
        self.store
            .snapshot()
            .map_or(true, |tokens| tokens.is_expired())
    }

    /// Make sure the session holds a usable access token.
    pub async fn ensure_valid(&self) -> Result<(), AuthError> {
        self.valid_tokens().await.map(|_| ())
    }

    /// Like [`ensure_valid`](Self::ensure_valid), returning the usable token set.
    pub async fn valid_tokens(&self) -> Result<TokenSet, AuthError> {
        if let Some(tokens) = self.usable_snapshot() {
            debug!("Access token still valid");
            return Ok(tokens);
        }

        let refresh = {
            let mut slot = self.in_flight.lock();

            // Another caller may have finished a refresh while we waited.
            let (tokens, generation) = self.store.versioned_snapshot();
            if let Some(tokens) = tokens.as_ref().filter(|t| !t.is_expired()) {
                return Ok(tokens.clone());
            }

            match slot.as_ref() {
                Some(pending) if pending.generation == generation => {
                    debug!("Joining in-flight token refresh");
                    pending.refresh.clone()
                }
                _ => {
                    let Some(refresh_token) = tokens.and_then(|t| t.refresh_token) else {
                        info!("Access token expired and no refresh token held");
                        self.store.clear_tokens_if(generation);
                        return Err(AuthError::AuthenticationRequired);
                    };
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let refresh = self.start_refresh(id, generation, refresh_token);
                    *slot = Some(InFlight {
                        id,
                        generation,
                        refresh: refresh.clone(),
                    });
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Drop the session and forget any in-flight refresh.
    pub fn clear(&self) {
        let mut slot = self.in_flight.lock();
        *slot = None;
        self.store.clear_tokens();
    }

    /// Drop the session, e.g. after the resource server answered 401.
    pub fn invalidate(&self) {
        warn!("Session invalidated");
        self.clear();
    }

    /// Drop the session only if it still holds `access_token`.
    ///
    /// Returns whether the session was dropped. A token that has already
    /// been replaced leaves the newer session alone.
    pub fn invalidate_token(&self, access_token: &str) -> bool {
        let mut slot = self.in_flight.lock();
        if !self.store.clear_if_access_token(access_token) {
            debug!("Rejected access token already replaced");
            return false;
        }
        *slot = None;
        warn!("Session invalidated");
        true
    }

    fn usable_snapshot(&self) -> Option<TokenSet> {
        self.store.snapshot().filter(|tokens| !tokens.is_expired())
    }

    fn start_refresh(&self, id: u64, generation: u64, refresh_token: String) -> SharedRefresh {
        let store = self.store.clone();
        let endpoint = self.endpoint.clone();
        let retry = self.retry.clone();
        let slot = self.in_flight.clone();

        async move {
            info!("Refreshing expired access token");
            let result = retry.run(|| endpoint.refresh(&refresh_token)).await;

            let outcome = match result {
                Ok(mut tokens) => {
                    if tokens.refresh_token.is_none() {
                        tokens.refresh_token = Some(refresh_token);
                    }
                    match store.set_token_set_if(generation, tokens.clone()) {
                        Ok(true) => {
                            info!("Access token refreshed");
                            Ok(tokens)
                        }
                        Ok(false) => {
                            info!("Session changed during refresh, discarding refreshed tokens");
                            store
                                .snapshot()
                                .filter(|current| !current.is_expired())
                                .ok_or(AuthError::AuthenticationRequired)
                        }
                        Err(e) => {
                            store.clear_tokens_if(generation);
                            Err(e)
                        }
                    }
                }
                Err(e) => {
                    if store.clear_tokens_if(generation) {
                        warn!(error = %e, "Token refresh failed, clearing session");
                    } else {
                        debug!(error = %e, "Token refresh failed for a replaced session");
                    }
                    Err(e)
                }
            };

            let mut slot = slot.lock();
            if matches!(slot.as_ref(), Some(current) if current.id == id) {
                *slot = None;
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("refreshing", &self.in_flight.lock().is_some())
            .finish()
    }
}
