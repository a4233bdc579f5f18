//! Client for the dashboard's resource server.
//!
//! Every request goes through the session: the access token is refreshed
//! when needed and sent as a bearer token. A 401 ends the session unless a
//! newer token has been stored since the request was sent.

use fitdash_auth::SessionManager;
use fitdash_core::AuthError;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from resource-server calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No valid session, or the server rejected the token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response other than 401.
    #[error("Resource server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the user has to log in again.
    pub fn is_authentication_required(&self) -> bool {
        matches!(self, Self::Auth(AuthError::AuthenticationRequired))
    }
}

/// Resource-server client bound to a session.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl ApiClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, session: Arc<SessionManager>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Use a custom HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// The session this client authenticates with.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// `GET path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        decode(response).await
    }

    /// `POST path` with a JSON body and decode the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, Some(body)).await?;
        decode(response).await
    }

    /// Send an authenticated request and check its status.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%method, %url, "Resource server request");

        let (token, response) = self
            .session
            .with_valid_session(|token| async move {
                let mut request = self.http.request(method, &url).bearer_auth(&token);
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request.send().await?;
                Ok::<_, ApiError>((token, response))
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!("Resource server rejected the access token");
            self.session.invalidate_token(&token);
            return Err(AuthError::AuthenticationRequired.into());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
