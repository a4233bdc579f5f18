//! OAuth configuration.

use fitdash_core::AuthError;
use std::time::Duration;

/// Path the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &str = "openid profile email offline_access";

/// Dashboard origin used when `PUBLIC_DASHBOARD_BASE_URL` is unset.
pub const DEFAULT_DASHBOARD_ORIGIN: &str = "http://localhost:5173";

/// Configuration for the identity provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client ID
    pub client_id: String,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL (code exchange)
    pub token_endpoint: String,
    /// Refresh endpoint URL (refresh-token grant)
    pub refresh_endpoint: String,
    /// Registered redirect URI
    pub redirect_uri: String,
    /// OAuth scopes (space-separated)
    pub scopes: String,
    /// How long a local callback listener waits for the redirect
    pub callback_timeout: Duration,
}

impl OAuthConfig {
    /// Create a configuration for the provider at `base_url`.
    ///
    /// Endpoints default to `{base_url}/oauth/authorize` and
    /// `{base_url}/oauth/token`; refresh uses the token endpoint.
    pub fn new(
        base_url: impl AsRef<str>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let base = base_url.as_ref().trim_end_matches('/');
        let token_endpoint = format!("{base}/oauth/token");
        Self {
            client_id: client_id.into(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            refresh_endpoint: token_endpoint.clone(),
            token_endpoint,
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.to_string(),
            callback_timeout: Duration::from_secs(120),
        }
    }

    /// Load the configuration from the environment.
    ///
    /// Reads `IDENTITY_PROVIDER_URL` and `OAUTH_CLIENT_ID` (required),
    /// `PUBLIC_DASHBOARD_BASE_URL` and `OAUTH_SCOPES` (optional).
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    AuthError::configuration(format!("{key} environment variable not set"))
                })
        };

        let base_url = required("IDENTITY_PROVIDER_URL")?;
        let client_id = required("OAUTH_CLIENT_ID")?;
        let origin = lookup("PUBLIC_DASHBOARD_BASE_URL")
            .unwrap_or_else(|| DEFAULT_DASHBOARD_ORIGIN.to_string());

        let mut config = Self::new(base_url, client_id, redirect_uri_for_origin(&origin));
        if let Some(scopes) = lookup("OAUTH_SCOPES") {
            config = config.with_scopes(scopes);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set OAuth scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    /// Override the authorization endpoint.
    #[must_use]
    pub fn with_authorization_endpoint(mut self, url: impl Into<String>) -> Self {
        self.authorization_endpoint = url.into();
        self
    }

    /// Override the token endpoint. The refresh endpoint is left unchanged.
    #[must_use]
    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    /// Override the refresh endpoint.
    #[must_use]
    pub fn with_refresh_endpoint(mut self, url: impl Into<String>) -> Self {
        self.refresh_endpoint = url.into();
        self
    }

    /// Set the callback listener timeout.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Check that every endpoint and the redirect URI are absolute URLs.
    pub fn validate(&self) -> Result<(), AuthError> {
        for (name, value) in [
            ("authorization endpoint", &self.authorization_endpoint),
            ("token endpoint", &self.token_endpoint),
            ("refresh endpoint", &self.refresh_endpoint),
            ("redirect URI", &self.redirect_uri),
        ] {
            url::Url::parse(value)
                .map_err(|e| AuthError::configuration(format!("invalid {name} '{value}': {e}")))?;
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("client ID is empty"));
        }
        Ok(())
    }
}

/// Redirect URI registered for a running origin.
pub fn redirect_uri_for_origin(origin: &str) -> String {
    format!("{}{}", origin.trim_end_matches('/'), CALLBACK_PATH)
}
