//! Running protected work behind a valid session.

use crate::guard::TokenGuard;
use fitdash_core::AuthError;
use std::future::Future;
use tracing::debug;

/// Run `action` with a valid access token.
///
/// The token is refreshed first if needed. When no valid session can be
/// established, `action` is not called and
/// [`AuthError::AuthenticationRequired`] is returned. Otherwise the action's
/// own result passes through untouched.
pub async fn with_valid_session<F, Fut, T, E>(guard: &TokenGuard, action: F) -> Result<T, E>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<AuthError>,
{
    let tokens = match guard.valid_tokens().await {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!(error = %e, "No valid session for protected call");
            return Err(AuthError::AuthenticationRequired.into());
        }
    };

    action(tokens.access_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionStore, TokenEndpoint};
    use async_trait::async_trait;
    use fitdash_core::{MemoryStorage, TokenSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RejectingEndpoint;

    #[async_trait]
    impl TokenEndpoint for RejectingEndpoint {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
            Err(AuthError::token_refresh_failed(Some(400), "invalid_grant"))
        }
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Auth(AuthError),
        NotFound,
    }

    impl From<AuthError> for AppError {
        fn from(err: AuthError) -> Self {
            Self::Auth(err)
        }
    }

    fn guard() -> TokenGuard {
        let store = Arc::new(SessionStore::new(MemoryStorage::shared()));
        TokenGuard::new(store, Arc::new(RejectingEndpoint))
    }

    #[tokio::test]
    async fn test_action_receives_access_token() {
        let guard = guard();
        guard.store().set_tokens("abc", None, 3600).unwrap();

        let result: Result<String, AppError> =
            with_valid_session(&guard, |token| async move { Ok(format!("Bearer {token}")) }).await;
        assert_eq!(result, Ok("Bearer abc".to_string()));
    }

    #[tokio::test]
    async fn test_action_error_passes_through() {
        let guard = guard();
        guard.store().set_tokens("abc", None, 3600).unwrap();

        let result: Result<(), AppError> =
            with_valid_session(&guard, |_| async { Err(AppError::NotFound) }).await;
        assert_eq!(result, Err(AppError::NotFound));
    }

    #[tokio::test]
    async fn test_action_skipped_without_session() {
        let guard = guard();
        guard.store().set_tokens("abc", Some("r".into()), 60).unwrap();
        let called = AtomicBool::new(false);

        let result: Result<(), AppError> = with_valid_session(&guard, |_| async {
            called.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(AppError::Auth(AuthError::AuthenticationRequired))
        );
        assert!(!called.load(Ordering::SeqCst));
        assert!(!guard.store().is_authenticated());
    }
}
