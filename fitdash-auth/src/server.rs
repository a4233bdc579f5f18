//! Local HTTP listener that receives the provider redirect.
//!
//! Used by the command-line login, where no dashboard page is around to
//! receive the callback. The listener only captures the URL; validation is
//! left to [`OAuthClient::handle_callback`](crate::OAuthClient::handle_callback).

use crate::config::CALLBACK_PATH;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;
use url::Url;

/// Errors that can occur while waiting for the redirect.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// No redirect arrived in time.
    #[error("Callback timeout")]
    Timeout,
    /// The redirect URI cannot be served locally.
    #[error("Unsupported redirect URI: {0}")]
    UnsupportedRedirect(String),
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-use listener for the OAuth redirect.
pub struct CallbackServer {
    listener: TcpListener,
    origin: String,
}

impl CallbackServer {
    /// Bind on loopback at the port of `redirect_uri`.
    pub async fn for_redirect_uri(redirect_uri: &str) -> Result<Self, CallbackError> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| CallbackError::UnsupportedRedirect(format!("{redirect_uri}: {e}")))?;

        match url.host_str() {
            Some("localhost" | "127.0.0.1") => {}
            _ => return Err(CallbackError::UnsupportedRedirect(redirect_uri.to_string())),
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CallbackError::UnsupportedRedirect(redirect_uri.to_string()))?;

        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self {
            listener,
            origin: url.origin().ascii_serialization(),
        })
    }

    /// Bind on an explicit address. Port `0` picks a free port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, CallbackError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        Ok(Self {
            listener,
            origin: format!("http://{local}"),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CallbackError> {
        Ok(self.listener.local_addr()?)
    }

    /// The redirect URI this listener serves.
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.origin, CALLBACK_PATH)
    }

    /// Wait for the redirect and return it as an absolute URL.
    ///
    /// Requests for other paths are answered with 404 and ignored.
    pub async fn wait_for_callback(self, timeout: Duration) -> Result<String, CallbackError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                let (mut stream, peer) = self.listener.accept().await?;

                let mut buffer = [0u8; 8192];
                let n = stream.read(&mut buffer).await?;
                let request = String::from_utf8_lossy(&buffer[..n]);

                match request_target(&request) {
                    Some(target) if is_callback_target(target) => {
                        debug!(%peer, "Received OAuth redirect");
                        let _ = stream.write_all(received_response().as_bytes()).await;
                        return Ok::<_, std::io::Error>(format!("{}{target}", self.origin));
                    }
                    _ => {
                        let _ = stream.write_all(not_found_response().as_bytes()).await;
                    }
                }
            }
        })
        .await;

        match result {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(e)) => Err(CallbackError::Io(e)),
            Err(_) => Err(CallbackError::Timeout),
        }
    }
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("origin", &self.origin)
            .finish()
    }
}

// GET /oauth/callback?code=xxx&state=yyy HTTP/1.1
fn request_target(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Some(target),
        _ => None,
    }
}

fn is_callback_target(target: &str) -> bool {
    let path = target.split('?').next().unwrap_or_default();
    path == CALLBACK_PATH
}

fn html_response(status: &str, title: &str, message: &str) -> String {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>{title}</h1>
<p>{message}</p>
</body>
</html>"#
    );
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn received_response() -> String {
    html_response(
        "200 OK",
        "Login received",
        "You can close this window and return to the terminal.",
    )
}

fn not_found_response() -> String {
    html_response("404 Not Found", "Not found", "This page is not part of the login.")
}
