use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

fn default_auth_base_url() -> String {
    "https://auth.truelayer.com".to_string()
}

fn default_api_base_url() -> String {
    "https://api.truelayer.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Aggregator client configuration.
///
/// Constructed explicitly and handed to the services that need it; there is
/// no process-wide client instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Redirect URI registered with the aggregator for the OAuth flow.
    pub redirect_uri: String,

    /// Token endpoint host.
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,

    /// Data endpoint host.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bound on every outbound request; the aggregator is a third party.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            auth_base_url: default_auth_base_url(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse provider config: {}", path.display()))
    }

    /// Point both endpoints at one host (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.auth_base_url = base_url.clone();
        self.api_base_url = base_url;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
