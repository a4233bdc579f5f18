//! Token types shared by the OAuth client and the session store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Safety buffer, in seconds, subtracted from `expires_at` when deciding
/// whether a token is still usable. A token is never reported valid within
/// five minutes of its real expiry.
pub const EXPIRY_SKEW_SECS: i64 = 5 * 60;

/// Token response from the OAuth token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token for resource-server requests
    pub access_token: String,
    /// Refresh token, possibly rotated
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a [`TokenSet`] anchored at `now`.
    pub fn into_token_set(self, now: DateTime<Utc>) -> TokenSet {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Some(expires_at_from(now, expires_in)),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
        }
    }
}

/// The credentials held by an authenticated session.
///
/// Always replaced as a whole, never patched field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token presented as `Authorization: Bearer ...`
    pub access_token: String,
    /// Refresh token (absent for providers that do not issue one)
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token
    pub expires_at: Option<DateTime<Utc>>,
    /// Token type
    pub token_type: String,
    /// Granted scopes
    pub scope: Option<String>,
}

impl TokenSet {
    /// Build a bearer token set expiring `expires_in_secs` after `now`.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: Some(expires_at_from(now, expires_in_secs)),
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    /// Whether the access token must be refreshed at `now`.
    ///
    /// True when no expiry is recorded or `now >= expires_at - EXPIRY_SKEW_SECS`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired_at(self.expires_at, now)
    }

    /// Whether the access token must be refreshed now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining lifetime before the raw expiry, in seconds.
    pub fn remaining_lifetime(&self) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Expiry check shared by token sets and bare expiry instants.
pub fn is_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires_at) => now >= expires_at - Duration::seconds(EXPIRY_SKEW_SECS),
        None => true,
    }
}

/// `now + expires_in_secs * 1000` milliseconds.
pub fn expires_at_from(now: DateTime<Utc>, expires_in_secs: u64) -> DateTime<Utc> {
    let millis = i64::try_from(expires_in_secs)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000);
    now + Duration::milliseconds(millis)
}
