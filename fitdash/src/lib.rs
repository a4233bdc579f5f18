//! # fitdash
//!
//! Session-aware client for the fitdash training dashboard.
//!
//! The heavy lifting lives in two crates, re-exported here:
//!
//! - [`core`]: errors, token types and storage backends
//! - [`auth`]: OAuth 2.0 PKCE login, the session store and token refresh
//!
//! This crate adds what an application needs around them: an
//! authenticated [`ApiClient`] for the resource server, durable
//! [`Preferences`] and [`telemetry`] setup.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fitdash::prelude::*;
//! use std::sync::Arc;
//!
//! let session = Arc::new(SessionManager::new(OAuthConfig::from_env()?, MemoryStorage::shared()));
//! session.login(&BrowserNavigator)?;
//! // ...the provider redirects back...
//! session.complete_login(&callback_url).await?;
//!
//! let api = ApiClient::new("https://api.example.com", session);
//! let miles: f64 = api.get_json("/metrics/mileage/total").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod api;
pub mod preferences;
pub mod telemetry;

/// Errors, token types and storage.
pub use fitdash_core as core;

/// Login, session store and token refresh.
pub use fitdash_auth as auth;

pub use api::{ApiClient, ApiError};
pub use preferences::{Preferences, PreferencesStore, Theme, Thresholds, TimeRange};

pub use fitdash_auth::{
    with_valid_session, BrowserNavigator, CallbackServer, FlowState, Navigator, OAuthClient,
    OAuthConfig, SessionManager, SessionStatus, SessionStore, TokenGuard,
};
pub use fitdash_core::{AuthError, FileStorage, MemoryStorage, SharedStorage, Storage, TokenSet};

/// Common imports.
pub mod prelude {
    pub use crate::api::{ApiClient, ApiError};
    pub use crate::preferences::{Preferences, PreferencesStore};
    pub use fitdash_auth::{BrowserNavigator, Navigator, OAuthConfig, SessionManager, SessionStatus};
    pub use fitdash_core::{AuthError, FileStorage, MemoryStorage, Storage, TokenSet};
}
