//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! The redirect splits a login into two entry points that never share a call
//! stack: [`OAuthClient::start_flow`] persists a [`PkceContext`] and navigates
//! away, [`OAuthClient::handle_callback`] picks the context up again when the
//! provider redirects back. Token refresh goes through the
//! [`TokenEndpoint`] trait so the token guard can be driven by any backend.

use crate::config::OAuthConfig;
use crate::navigator::Navigator;
use crate::pkce::{self, PkceContext, CHALLENGE_METHOD, STATE_KEY, VERIFIER_KEY};
use async_trait::async_trait;
use fitdash_core::{AuthError, SharedStorage, TokenResponse, TokenSet};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

/// Where a client is in the login lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No login in progress and no session.
    Idle,
    /// Generating PKCE parameters and the authorization URL.
    Authorizing,
    /// Navigated to the provider, waiting for the redirect.
    AwaitingCallback,
    /// Exchanging the authorization code.
    Exchanging,
    /// Holding a token set.
    Authenticated,
    /// Refreshing the held token set.
    Refreshing,
}

/// Anything that can trade a refresh token for a new token set.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Perform one refresh-token grant. Implementations must not retry.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}

/// Query parameters of a provider redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed state
    pub state: Option<String>,
    /// OAuth error code
    pub error: Option<String>,
    /// OAuth error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse the query of an absolute callback URL.
    pub fn parse(current_url: &str) -> Result<Self, AuthError> {
        let url = Url::parse(current_url)
            .map_err(|e| AuthError::InvalidCallbackUrl(format!("{current_url}: {e}")))?;

        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Ok(params)
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// A failed call to the provider, before it is classified as an exchange or
/// refresh error.
struct EndpointFailure {
    status: Option<StatusCode>,
    /// Whether the request may have reached the provider.
    sent: bool,
    detail: String,
}

/// OAuth 2.0 client for the identity provider.
pub struct OAuthClient {
    config: OAuthConfig,
    http: Client,
    storage: SharedStorage,
    state: Mutex<FlowState>,
}

impl OAuthClient {
    /// Create a client that keeps its PKCE context in `storage`.
    ///
    /// `storage` must be session-scoped.
    pub fn new(config: OAuthConfig, storage: SharedStorage) -> Self {
        Self {
            config,
            http: Client::new(),
            storage,
            state: Mutex::new(FlowState::Idle),
        }
    }

    /// Use a custom HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// The provider configuration.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: FlowState) {
        *self.state.lock() = state;
    }

    /// Build the authorization URL for a context.
    pub fn authorization_url(&self, context: &PkceContext) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.config.authorization_endpoint).map_err(|e| {
            AuthError::configuration(format!(
                "invalid authorization endpoint '{}': {e}",
                self.config.authorization_endpoint
            ))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", &context.state)
            .append_pair("code_challenge", &context.code_challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        Ok(url.into())
    }

    /// Begin a login: persist a fresh PKCE context and navigate to the provider.
    ///
    /// Nothing after the navigation belongs to this attempt; the login resumes
    /// in [`handle_callback`](Self::handle_callback).
    pub fn start_flow(&self, navigator: &dyn Navigator) -> Result<(), AuthError> {
        self.set_state(FlowState::Authorizing);

        let result = PkceContext::generate().and_then(|context| {
            context.persist(self.storage.as_ref())?;
            let url = self.authorization_url(&context)?;
            Ok(url)
        });

        let url = match result {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Failed to start login");
                self.discard_pending_login();
                self.set_state(FlowState::Idle);
                return Err(e);
            }
        };

        info!(endpoint = %self.config.authorization_endpoint, "Redirecting to identity provider");
        self.set_state(FlowState::AwaitingCallback);
        if let Err(e) = navigator.navigate(&url) {
            warn!(error = %e, "Navigation to identity provider failed");
            self.discard_pending_login();
            self.set_state(FlowState::Idle);
            return Err(e);
        }
        Ok(())
    }

    fn discard_pending_login(&self) {
        if let Err(e) = PkceContext::discard(self.storage.as_ref()) {
            warn!(error = %e, "Failed to discard pending login");
        }
    }

    /// Complete a login from the provider's redirect URL.
    ///
    /// The stored PKCE context is consumed by this call whatever the outcome,
    /// so a replayed callback always fails with [`AuthError::StateMismatch`].
    pub async fn handle_callback(&self, current_url: &str) -> Result<TokenSet, AuthError> {
        let result = self.consume_callback(current_url).await;
        match &result {
            Ok(_) => self.set_state(FlowState::Authenticated),
            Err(e) => {
                warn!(error = %e, "Login callback failed");
                self.set_state(FlowState::Idle);
            }
        }
        result
    }

    async fn consume_callback(&self, current_url: &str) -> Result<TokenSet, AuthError> {
        let params = CallbackParams::parse(current_url)?;

        let stored_state = self.storage.get(STATE_KEY)?;
        let stored_verifier = self.storage.get(VERIFIER_KEY)?;
        PkceContext::discard(self.storage.as_ref())?;

        if let Some(code) = params.error {
            return Err(AuthError::provider(code, params.error_description));
        }

        let code = params.code.ok_or(AuthError::MissingAuthorizationCode)?;

        match (stored_state.as_deref(), params.state.as_deref()) {
            (Some(expected), Some(received)) if pkce::tokens_match(expected, received) => {}
            _ => return Err(AuthError::StateMismatch),
        }

        let verifier = stored_verifier.ok_or(AuthError::MissingCodeVerifier)?;

        self.set_state(FlowState::Exchanging);
        self.exchange_code(&code, &verifier).await
    }

    /// Exchange an authorization code for a token set.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        debug!(endpoint = %self.config.token_endpoint, "Exchanging authorization code");
        let tokens = self
            .post_form(&self.config.token_endpoint, &params)
            .await
            .map_err(|f| AuthError::token_exchange_failed(f.detail))?;
        info!("Authorization code exchanged");
        Ok(tokens)
    }

    /// Trade a refresh token for a new token set. Never retries.
    ///
    /// A request that was sent but got no response fails with
    /// [`AuthError::RefreshOutcomeUnknown`]; one that never reached the
    /// provider fails with a `TokenRefreshFailed` without a status.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        debug!(endpoint = %self.config.refresh_endpoint, "Refreshing access token");
        self.set_state(FlowState::Refreshing);

        match self.post_form(&self.config.refresh_endpoint, &params).await {
            Ok(tokens) => {
                self.set_state(FlowState::Authenticated);
                Ok(tokens)
            }
            Err(f) => {
                self.set_state(FlowState::Idle);
                match f.status {
                    None if f.sent => Err(AuthError::RefreshOutcomeUnknown(f.detail)),
                    status => Err(AuthError::token_refresh_failed(
                        status.map(|s| s.as_u16()),
                        f.detail,
                    )),
                }
            }
        }
    }

    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenSet, EndpointFailure> {
        let response = self
            .http
            .post(endpoint)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| EndpointFailure {
                status: None,
                sent: !e.is_connect() && !e.is_builder(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointFailure {
                status: Some(status),
                sent: true,
                detail: failure_detail(status, &body),
            });
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| EndpointFailure {
            status: Some(status),
            sent: true,
            detail: format!("invalid token response: {e}"),
        })?;
        Ok(tokens.into_token_set(chrono::Utc::now()))
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        OAuthClient::refresh(self, refresh_token).await
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// The provider's `error_description` if it sent one, else the status text.
fn failure_detail(status: StatusCode, body: &str) -> String {
    let parsed: Option<ProviderErrorBody> = serde_json::from_str(body).ok();
    if let Some(body) = parsed {
        if let Some(description) = body.error_description.filter(|d| !d.is_empty()) {
            return description;
        }
        if let Some(error) = body.error.filter(|e| !e.is_empty()) {
            return error;
        }
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::RecordingNavigator;
    use fitdash_core::{MemoryStorage, Storage, StorageError};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REDIRECT: &str = "http://localhost:5173/oauth/callback";

    fn test_client(server_uri: &str) -> (OAuthClient, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let config = OAuthConfig::new(server_uri, "fitdash-dashboard", REDIRECT)
            .with_scopes("openid profile");
        (OAuthClient::new(config, storage.clone()), storage)
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "openid profile"
        })
    }

    fn stored_state(storage: &MemoryStorage) -> String {
        storage.get(STATE_KEY).unwrap().unwrap()
    }

    #[test]
    fn test_start_flow_builds_authorization_url() {
        let (client, storage) = test_client("https://id.example.com");
        let navigator = RecordingNavigator::new();

        client.start_flow(&navigator).unwrap();
        assert_eq!(client.state(), FlowState::AwaitingCallback);

        let url = Url::parse(&navigator.last().unwrap()).unwrap();
        assert_eq!(url.path(), "/oauth/authorize");
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "fitdash-dashboard");
        assert_eq!(query["redirect_uri"], REDIRECT);
        assert_eq!(query["scope"], "openid profile");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["state"], stored_state(&storage));

        let verifier = storage.get(VERIFIER_KEY).unwrap().unwrap();
        assert_eq!(query["code_challenge"], pkce::generate_code_challenge(&verifier));
    }

    #[test]
    fn test_each_flow_gets_fresh_context() {
        let (client, storage) = test_client("https://id.example.com");
        let navigator = RecordingNavigator::new();

        client.start_flow(&navigator).unwrap();
        let first = stored_state(&storage);
        client.start_flow(&navigator).unwrap();
        let second = stored_state(&storage);

        assert_ne!(first, second);
        assert_eq!(navigator.visited().len(), 2);
    }

    #[test]
    fn test_callback_params_parse() {
        let params = CallbackParams::parse(
            "http://localhost/oauth/callback?error=access_denied&error_description=User%20denied%20access",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User denied access"));
        assert_eq!(params.code, None);

        assert!(matches!(
            CallbackParams::parse("not a url"),
            Err(AuthError::InvalidCallbackUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_callback_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        client.start_flow(&RecordingNavigator::new()).unwrap();

        let err = client
            .handle_callback(&format!(
                "{REDIRECT}?error=access_denied&error_description=User%20denied%20access"
            ))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("access_denied"));
        assert!(message.contains("User denied access"));
        assert_eq!(client.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn test_callback_missing_code() {
        let (client, _storage) = test_client("https://id.example.com");
        client.start_flow(&RecordingNavigator::new()).unwrap();

        let err = client
            .handle_callback(&format!("{REDIRECT}?state=whatever"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingAuthorizationCode);
    }

    #[tokio::test]
    async fn test_callback_state_mismatch_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a", "r")))
            .expect(0)
            .mount(&server)
            .await;

        let (client, storage) = test_client(&server.uri());
        client.start_flow(&RecordingNavigator::new()).unwrap();

        let err = client
            .handle_callback(&format!("{REDIRECT}?code=abc&state=forged"))
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::StateMismatch);
        assert!(storage.is_empty(), "context must be discarded on mismatch");
    }

    #[tokio::test]
    async fn test_callback_without_stored_context() {
        let (client, _storage) = test_client("https://id.example.com");
        let err = client
            .handle_callback(&format!("{REDIRECT}?code=abc&state=s"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::StateMismatch);
    }

    #[tokio::test]
    async fn test_callback_missing_verifier() {
        let (client, storage) = test_client("https://id.example.com");
        client.start_flow(&RecordingNavigator::new()).unwrap();
        let state = stored_state(&storage);
        storage.remove(VERIFIER_KEY).unwrap();

        let err = client
            .handle_callback(&format!("{REDIRECT}?code=abc&state={state}"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingCodeVerifier);
    }

    #[tokio::test]
    async fn test_callback_exchanges_code() {
        let server = MockServer::start().await;
        let (client, storage) = test_client(&server.uri());
        client.start_flow(&RecordingNavigator::new()).unwrap();
        let state = stored_state(&storage);
        let verifier = storage.get(VERIFIER_KEY).unwrap().unwrap();

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_id=fitdash-dashboard"))
            .and(body_string_contains(format!("code_verifier={verifier}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1", "refresh-1")))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client
            .handle_callback(&format!("{REDIRECT}?code=the-code&state={state}"))
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(tokens.scope.as_deref(), Some("openid profile"));
        assert!(!tokens.is_expired());
        assert_eq!(client.state(), FlowState::Authenticated);
        assert!(storage.is_empty(), "context must be single use");

        // Replaying the same callback fails closed.
        let err = client
            .handle_callback(&format!("{REDIRECT}?code=the-code&state={state}"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::StateMismatch);
    }

    #[tokio::test]
    async fn test_exchange_failure_uses_error_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Authorization code expired"
            })))
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        let err = client.exchange_code("code", "verifier").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::TokenExchangeFailed("Authorization code expired".into())
        );
    }

    #[tokio::test]
    async fn test_exchange_failure_falls_back_to_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        let err = client.exchange_code("code", "verifier").await.unwrap_err();
        assert_eq!(err, AuthError::TokenExchangeFailed("Bad Gateway".into()));
    }

    #[tokio::test]
    async fn test_refresh_posts_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("client_id=fitdash-dashboard"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2", "refresh-2")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        let tokens = client.refresh("old-refresh").await.unwrap();
        assert_eq!(tokens.access_token, "access-2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_refresh_uses_refresh_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a", "r")))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let config = OAuthConfig::new(server.uri(), "c", REDIRECT)
            .with_refresh_endpoint(format!("{}/oauth/refresh", server.uri()));
        let client = OAuthClient::new(config, storage);
        assert!(client.refresh("r0").await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        let err = client.refresh("stale").await.unwrap_err();
        assert_eq!(err, AuthError::token_refresh_failed(Some(400), "invalid_grant"));
        assert!(!err.is_transient());
    }

    struct FailingNavigator;

    impl Navigator for FailingNavigator {
        fn navigate(&self, _url: &str) -> Result<(), AuthError> {
            Err(AuthError::Navigation("no browser".into()))
        }
    }

    /// Session storage whose deletes always fail.
    #[derive(Default)]
    struct UndeletableStorage(MemoryStorage);

    impl Storage for UndeletableStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.0.set(key, value)
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Io("read-only".into()))
        }
    }

    #[test]
    fn test_navigation_failure_discards_context() {
        let (client, storage) = test_client("https://id.example.com");

        let err = client.start_flow(&FailingNavigator).unwrap_err();
        assert_eq!(err, AuthError::Navigation("no browser".into()));
        assert!(storage.is_empty());
        assert_eq!(client.state(), FlowState::Idle);
    }

    #[test]
    fn test_navigation_error_survives_failed_discard() {
        let config = OAuthConfig::new("https://id.example.com", "fitdash-dashboard", REDIRECT);
        let client = OAuthClient::new(config, Arc::new(UndeletableStorage::default()));

        let err = client.start_flow(&FailingNavigator).unwrap_err();
        assert_eq!(err, AuthError::Navigation("no browser".into()));
        assert_eq!(client.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_unreachable_provider_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (client, _storage) = test_client(&format!("http://{addr}"));
        let err = client.refresh("r0").await.unwrap_err();

        assert!(
            matches!(err, AuthError::TokenRefreshFailed { status: None, .. }),
            "unexpected error: {err:?}"
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refresh_without_response_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("a1", "r1"))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, _storage) = test_client(&server.uri());
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let client = client.with_http_client(http);

        let err = client.refresh("r0").await.unwrap_err();
        assert!(
            matches!(err, AuthError::RefreshOutcomeUnknown(_)),
            "unexpected error: {err:?}"
        );
        assert!(!err.is_transient());
        assert_eq!(client.state(), FlowState::Idle);
    }
}
