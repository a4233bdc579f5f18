//! Handing the authorization URL to a user agent.

use fitdash_core::AuthError;
use parking_lot::Mutex;

/// Performs the full navigation to the identity provider.
///
/// Navigation is terminal for the login attempt: the flow resumes in
/// [`OAuthClient::handle_callback`](crate::OAuthClient::handle_callback) once
/// the provider redirects back.
pub trait Navigator: Send + Sync {
    /// Send the user agent to `url`.
    fn navigate(&self, url: &str) -> Result<(), AuthError>;
}

/// Opens the authorization URL in the system browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserNavigator;

impl Navigator for BrowserNavigator {
    fn navigate(&self, url: &str) -> Result<(), AuthError> {
        open::that(url).map_err(|e| AuthError::Navigation(format!("failed to open browser: {e}")))
    }
}

/// Records navigations instead of performing them.
///
/// Useful for headless logins where the URL is printed for the user.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent URL, if any.
    pub fn last(&self) -> Option<String> {
        self.visited.lock().last().cloned()
    }

    /// Every recorded URL, oldest first.
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) -> Result<(), AuthError> {
        self.visited.lock().push(url.to_string());
        Ok(())
    }
}
