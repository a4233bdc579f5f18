//! # fitdash-core
//!
//! Core types shared across the fitdash workspace:
//!
//! - **Errors**: the [`AuthError`] taxonomy for login, refresh and session failures
//! - **Tokens**: [`TokenSet`] held by a session and the wire [`TokenResponse`]
//! - **Storage**: session-scoped and durable key-value backends
//!
//! ## Example
//!
//! ```rust
//! use fitdash_core::{MemoryStorage, Storage, TokenSet};
//!
//! let storage = MemoryStorage::new();
//! storage.set("greeting", "hello").unwrap();
//! assert_eq!(storage.get("greeting").unwrap().as_deref(), Some("hello"));
//!
//! let tokens = TokenSet::new("access", Some("refresh".into()), 3600, chrono::Utc::now());
//! assert!(!tokens.is_expired());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod errors;
pub mod storage;
pub mod token;

pub use errors::{AuthError, Result, StorageError};
pub use storage::{get_json, set_json, FileStorage, MemoryStorage, SharedStorage, Storage};
pub use token::{
    expires_at_from, is_expired_at, TokenResponse, TokenSet, DEFAULT_EXPIRES_IN_SECS,
    EXPIRY_SKEW_SECS,
};
