//! # fitdash-auth
//!
//! OAuth 2.0 authorization-code login with PKCE and the token lifecycle
//! around it.
//!
//! - [`OAuthClient`]: starts the flow and consumes the provider redirect
//! - [`SessionStore`]: owns the current [`TokenSet`](fitdash_core::TokenSet)
//! - [`TokenGuard`]: refreshes expired tokens, one refresh at a time
//! - [`with_valid_session`]: runs protected work behind the guard
//! - [`SessionManager`]: all of the above as one injectable object
//!
//! ## Example
//!
//! ```rust,ignore
//! use fitdash_auth::{BrowserNavigator, OAuthConfig, SessionManager};
//! use fitdash_core::MemoryStorage;
//!
//! let manager = SessionManager::new(OAuthConfig::from_env()?, MemoryStorage::shared());
//! manager.login(&BrowserNavigator)?;
//!
//! // ...later, when the provider redirects back:
//! manager.complete_login(&callback_url).await?;
//!
//! let profile = manager
//!     .with_valid_session(|token| async move { fetch_profile(&token).await })
//!     .await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod guard;
pub mod manager;
pub mod navigator;
pub mod pkce;
pub mod request;
pub mod retry;
pub mod server;
pub mod session;

pub use client::{CallbackParams, FlowState, OAuthClient, TokenEndpoint};
pub use config::{redirect_uri_for_origin, OAuthConfig, CALLBACK_PATH, DEFAULT_SCOPES};
pub use guard::TokenGuard;
pub use manager::SessionManager;
pub use navigator::{BrowserNavigator, Navigator, RecordingNavigator};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state, PkceContext};
pub use request::with_valid_session;
pub use retry::RefreshRetryPolicy;
pub use server::{CallbackError, CallbackServer};
pub use session::{SessionStatus, SessionStore};
