//! The session store: sole owner of the current token set.

use chrono::{DateTime, Utc};
use fitdash_core::{get_json, set_json, AuthError, SharedStorage, TokenSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Session storage key holding the serialized token set.
pub const SESSION_KEY: &str = "fitdash.session";

/// Read-only view of the session for UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Whether an access token is held.
    pub authenticated: bool,
    /// Whether the held access token is outside the expiry window. `None`
    /// when no expiry is known.
    pub access_token_valid: Option<bool>,
    /// Raw expiry of the held access token.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Holds the current [`TokenSet`] and mirrors it into session-scoped storage.
///
/// Every mutation replaces the whole set under one write lock, so readers
/// never see a new access token paired with a stale expiry. Each mutation
/// also bumps a generation counter; work started against one generation
/// (a refresh) commits only if the session has not changed since.
pub struct SessionStore {
    inner: RwLock<SessionState>,
    storage: SharedStorage,
}

#[derive(Default)]
struct SessionState {
    tokens: Option<TokenSet>,
    generation: u64,
}

impl SessionStore {
    /// Create an empty store backed by `storage`, which must be session-scoped.
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            inner: RwLock::new(SessionState::default()),
            storage,
        }
    }

    /// Create a store and restore any token set left in `storage`.
    ///
    /// An entry that cannot be parsed is removed and the store starts empty.
    pub fn rehydrate(storage: SharedStorage) -> Self {
        let restored = match get_json::<TokenSet>(storage.as_ref(), SESSION_KEY) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session entry");
                if let Err(e) = storage.remove(SESSION_KEY) {
                    warn!(error = %e, "Failed to remove unreadable session entry");
                }
                None
            }
        };

        if restored.is_some() {
            debug!("Restored session from session storage");
        }

        Self {
            inner: RwLock::new(SessionState {
                tokens: restored,
                generation: 0,
            }),
            storage,
        }
    }

    /// Replace the session with a bearer token set expiring in `expires_in_secs`.
    pub fn set_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: u64,
    ) -> Result<(), AuthError> {
        self.set_token_set(TokenSet::new(
            access_token,
            refresh_token,
            expires_in_secs,
            Utc::now(),
        ))
    }

    /// Replace the session with `tokens`.
    pub fn set_token_set(&self, tokens: TokenSet) -> Result<(), AuthError> {
        let mut state = self.inner.write();
        self.commit(&mut state, tokens)
    }

    /// Replace the session with `tokens` only if it is still at `generation`.
    ///
    /// Returns `Ok(false)` without touching anything when the session was
    /// replaced or cleared in the meantime.
    pub fn set_token_set_if(&self, generation: u64, tokens: TokenSet) -> Result<bool, AuthError> {
        let mut state = self.inner.write();
        if state.generation != generation {
            debug!(expected = generation, current = state.generation, "Dropping stale token set");
            return Ok(false);
        }
        self.commit(&mut state, tokens)?;
        Ok(true)
    }

    fn commit(&self, state: &mut SessionState, tokens: TokenSet) -> Result<(), AuthError> {
        set_json(self.storage.as_ref(), SESSION_KEY, &tokens)?;
        state.tokens = Some(tokens);
        state.generation += 1;
        info!("Session updated");
        Ok(())
    }

    /// Drop the session and its storage entry.
    pub fn clear_tokens(&self) {
        let mut state = self.inner.write();
        self.clear(&mut state);
    }

    /// Drop the session only if it is still at `generation`.
    pub fn clear_tokens_if(&self, generation: u64) -> bool {
        let mut state = self.inner.write();
        if state.generation != generation {
            return false;
        }
        self.clear(&mut state);
        true
    }

    /// Drop the session only if it still holds `access_token`.
    ///
    /// A rejection of an older token must not end a session that has
    /// already moved on to a newer one.
    pub fn clear_if_access_token(&self, access_token: &str) -> bool {
        let mut state = self.inner.write();
        match state.tokens.as_ref() {
            Some(tokens) if tokens.access_token == access_token => {
                self.clear(&mut state);
                true
            }
            _ => false,
        }
    }

    fn clear(&self, state: &mut SessionState) {
        state.tokens = None;
        state.generation += 1;
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            warn!(error = %e, "Failed to remove session entry");
        }
        debug!("Session cleared");
    }

    /// Counter bumped by every replacement or clear.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// A consistent copy of the held token set.
    pub fn snapshot(&self) -> Option<TokenSet> {
        self.inner.read().tokens.clone()
    }

    /// The held token set together with the generation it belongs to.
    pub fn versioned_snapshot(&self) -> (Option<TokenSet>, u64) {
        let state = self.inner.read();
        (state.tokens.clone(), state.generation)
    }

    /// The held access token.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// The held refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .tokens
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
    }

    /// Raw expiry of the held access token.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().tokens.as_ref().and_then(|t| t.expires_at)
    }

    /// Whether an access token is held.
    pub fn is_authenticated(&self) -> bool {
        self.inner.read().tokens.is_some()
    }

    /// Snapshot for display.
    pub fn status(&self) -> SessionStatus {
        let state = self.inner.read();
        match state.tokens.as_ref() {
            Some(set) => SessionStatus {
                authenticated: true,
                access_token_valid: set.expires_at.map(|_| !set.is_expired()),
                expires_at: set.expires_at,
            },
            None => SessionStatus {
                authenticated: false,
                access_token_valid: None,
                expires_at: None,
            },
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("SessionStore")
            .field("tokens", &state.tokens)
            .field("generation", &state.generation)
            .finish()
    }
}
