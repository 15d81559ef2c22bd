//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use url::Url;

use crate::session::secure::SecureString;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Mark session cookies `Secure`. Enable when served over HTTPS.
    pub secure_cookies: bool,
    /// Cookie encryption key material; generated per process when unset.
    #[serde(default)]
    pub cookie_key: Option<SecureString>,
    /// Sessions unused for this long are dropped from the store.
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: u32,
}

fn default_session_idle_minutes() -> u32 {
    480
}

/// Client credential and provider endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Authority host, e.g. `login.windows.net`. A full URL is accepted too.
    pub authority: String,
    pub tenant: String,
    pub client_id: String,
    pub client_secret: SecureString,
    /// Resource the access token is issued for; also the directory base URL.
    pub resource: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub api_version: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Load configuration using `lookup` for environment overrides.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Parse embedded config
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        // Apply environment variable overrides
        if let Some(client_id) = lookup("AAD_PROTO_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Some(client_secret) = lookup("AAD_PROTO_CLIENT_SECRET") {
            config.oauth.client_secret = SecureString::new(client_secret);
        }

        if let Some(tenant) = lookup("AAD_PROTO_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Some(authority) = lookup("AAD_PROTO_AUTHORITY") {
            config.oauth.authority = authority;
        }

        if let Some(resource) = lookup("AAD_PROTO_RESOURCE") {
            config.oauth.resource = resource;
        }

        if let Some(redirect_uri) = lookup("AAD_PROTO_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Some(bind_addr) = lookup("AAD_PROTO_BIND_ADDR") {
            config.server.bind_addr = bind_addr;
        }

        if let Some(cookie_key) = lookup("COOKIE_KEY") {
            config.server.cookie_key = Some(SecureString::new(cookie_key));
        }

        // Validate required fields
        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.trim().is_empty() {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AAD_PROTO_CLIENT_ID environment variable"
            );
        }

        if self.oauth.client_secret.as_str().trim().is_empty() {
            anyhow::bail!(
                "Azure AD client secret not configured. Set AAD_PROTO_CLIENT_SECRET environment variable"
            );
        }

        if self.oauth.tenant.trim().is_empty() {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AAD_PROTO_TENANT_ID environment variable"
            );
        }

        if self.oauth.authority.trim().is_empty() {
            anyhow::bail!("Authority host is empty. Set AAD_PROTO_AUTHORITY or update config.toml");
        }

        Url::parse(&self.oauth.resource)
            .with_context(|| format!("Invalid resource URI: {}", self.oauth.resource))?;
        Url::parse(&self.oauth.redirect_uri)
            .with_context(|| format!("Invalid redirect URI: {}", self.oauth.redirect_uri))?;
        Url::parse(&self.tenant_authority())
            .with_context(|| format!("Invalid authority: {}", self.oauth.authority))?;

        if self.server.session_idle_minutes == 0 {
            anyhow::bail!("server.session_idle_minutes must be at least 1");
        }

        Ok(())
    }

    /// Authority URL scoped to the configured tenant.
    pub fn tenant_authority(&self) -> String {
        let authority = self.oauth.authority.trim_end_matches('/');
        if authority.contains("://") {
            format!("{}/{}", authority, self.oauth.tenant)
        } else {
            format!("https://{}/{}", authority, self.oauth.tenant)
        }
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!("{}/oauth2/authorize", self.tenant_authority())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.tenant_authority())
    }

    /// Configuration for unit tests, pointing the provider at `authority`.
    #[cfg(test)]
    pub fn for_tests(authority: &str, resource: &str) -> Self {
        Config {
            server: ServerConfig {
                bind_addr: "127.0.0.1:0".into(),
                secure_cookies: false,
                cookie_key: None,
                session_idle_minutes: 480,
            },
            oauth: OAuthConfig {
                authority: authority.into(),
                tenant: "test-tenant".into(),
                client_id: "test-client".into(),
                client_secret: SecureString::from("test-secret"),
                resource: resource.into(),
                redirect_uri: "http://localhost:4567/auth".into(),
            },
            directory: DirectoryConfig {
                api_version: "1.5".into(),
            },
        }
    }
}
