//! Error types for fitdash.
//!
//! Every failure the session subsystem can report is an [`AuthError`]. The
//! enum is `Clone` because a single refresh result is fanned out to every
//! caller waiting on it.

use thiserror::Error;

/// The main error type for authentication and session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The identity provider rejected the authorization request
    /// (e.g. the user denied consent).
    #[error("Provider error: {code}{}", fmt_description(.description))]
    ProviderError {
        /// OAuth error code (e.g. `access_denied`).
        code: String,
        /// Human readable `error_description`, if the provider sent one.
        description: Option<String>,
    },

    /// The callback URL carried no `code` parameter.
    #[error("Missing authorization code in callback")]
    MissingAuthorizationCode,

    /// The callback `state` did not match the stored one (possible CSRF or a
    /// stale callback).
    #[error("State mismatch - possible CSRF attack or stale callback")]
    StateMismatch,

    /// The callback arrived without a live PKCE context.
    #[error("Missing PKCE code verifier - the login was started in another session")]
    MissingCodeVerifier,

    /// Exchanging the authorization code failed.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Refreshing the access token failed.
    #[error("Token refresh failed: {detail}")]
    TokenRefreshFailed {
        /// HTTP status of the failed call, `None` when the request never
        /// reached the provider.
        status: Option<u16>,
        /// Provider `error_description`, status text or transport error.
        detail: String,
    },

    /// The refresh request was sent but no response arrived, so the
    /// provider may already have rotated the refresh token.
    #[error("Token refresh outcome unknown: {0}")]
    RefreshOutcomeUnknown(String),

    /// No valid session could be established.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The operating system's secure random source is unavailable.
    #[error("Secure random source unavailable: {0}")]
    RandomUnavailable(String),

    /// Handing the authorization URL to the browser failed.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The callback URL could not be parsed.
    #[error("Invalid callback URL: {0}")]
    InvalidCallbackUrl(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reading or writing session storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Create a provider error.
    pub fn provider(code: impl Into<String>, description: Option<String>) -> Self {
        Self::ProviderError {
            code: code.into(),
            description,
        }
    }

    /// Create a token exchange error.
    pub fn token_exchange_failed(detail: impl Into<String>) -> Self {
        Self::TokenExchangeFailed(detail.into())
    }

    /// Create a token refresh error.
    pub fn token_refresh_failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::TokenRefreshFailed {
            status,
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Only refresh failures where the request never reached the provider,
    /// rate limiting or a provider outage qualify. A rejected refresh token
    /// never does, and neither does a request that was sent but got no
    /// answer: replaying a rotated refresh token would be rejected.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TokenRefreshFailed { status: None, .. } => true,
            Self::TokenRefreshFailed {
                status: Some(status),
                ..
            } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Whether this error comes from the login flow itself.
    ///
    /// Flow errors are shown to the user with an option to retry login.
    /// Everything else (routine expiry, refresh failure) is recovered by
    /// silently dropping back to the unauthenticated state.
    pub fn is_flow_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderError { .. }
                | Self::MissingAuthorizationCode
                | Self::StateMismatch
                | Self::MissingCodeVerifier
                | Self::TokenExchangeFailed(_)
                | Self::RandomUnavailable(_)
                | Self::Navigation(_)
                | Self::InvalidCallbackUrl(_)
        )
    }

    /// Short message suitable for a UI banner.
    pub fn user_message(&self) -> String {
        if self.is_flow_error() {
            format!("Authentication Error: {self}")
        } else {
            "Your session has expired. Please log in again.".to_string()
        }
    }
}

fn fmt_description(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// Errors raised by a [`Storage`](crate::storage::Storage) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O failure in a durable backend.
    #[error("IO error: {0}")]
    Io(String),

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using [`AuthError`].
pub type Result<T> = std::result::Result<T, AuthError>;
