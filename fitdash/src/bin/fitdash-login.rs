//! Log in to the dashboard from a terminal.
//!
//! Listens on the configured redirect URI, opens the identity provider in
//! the browser and prints the resulting session. With `FITDASH_API_URL` set,
//! a total-mileage request is made to check the session end to end.
//!
//! Pass `--no-browser` to print the authorization URL instead of opening it.

use anyhow::{Context, Result};
use fitdash::auth::RecordingNavigator;
use fitdash::prelude::*;
use fitdash::telemetry;
use fitdash::CallbackServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().context("failed to initialise logging")?;

    let config = OAuthConfig::from_env().context("invalid OAuth configuration")?;
    let timeout = config.callback_timeout;

    let server = CallbackServer::for_redirect_uri(&config.redirect_uri)
        .await
        .with_context(|| format!("cannot listen on {}", config.redirect_uri))?;

    let session = Arc::new(SessionManager::new(config, MemoryStorage::shared()));

    if std::env::args().any(|arg| arg == "--no-browser") {
        let navigator = RecordingNavigator::new();
        session.login(&navigator)?;
        if let Some(url) = navigator.last() {
            println!("Open this URL to log in:\n\n  {url}\n");
        }
    } else {
        session.login(&BrowserNavigator)?;
        println!("Waiting for the browser login to finish...");
    }

    let callback_url = server.wait_for_callback(timeout).await?;
    let status = match session.complete_login(&callback_url).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let Some(expires_at) = status.expires_at {
        let minutes = (expires_at - chrono::Utc::now()).num_minutes();
        println!("Access token expires in {minutes} minutes");
    }

    if let Ok(api_url) = std::env::var("FITDASH_API_URL") {
        let api = ApiClient::new(api_url, session.clone());
        let miles: f64 = api.get_json("/metrics/mileage/total").await?;
        println!("Total mileage: {miles:.1}");
    }

    if let Ok(dir) = std::env::var("FITDASH_DATA_DIR") {
        let preferences = PreferencesStore::new(Arc::new(FileStorage::new(dir))).load();
        println!("Preferences: {}", serde_json::to_string(&preferences)?);
    }

    Ok(())
}
