//! OAuth2 client for the Azure AD v1 authorization-code and refresh-token grants.

use crate::config::Config;
use crate::error::AuthError;
use crate::session::secure::SecureString;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use super::provider::{AuthorizationRequest, IdentityProvider, TokenPair, TokenResponse};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (kept by the browser, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier = random_token(32);
        let challenge = Self::challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }

    /// BASE64URL(SHA256(verifier))
    fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// `len` random bytes, base64url encoded.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// OAuth2 client for Azure AD, holding the process-wide client credential.
pub struct OAuth2Client {
    client_id: String,
    client_secret: SecureString,
    resource: String,
    redirect_uri: String,
    authorize_endpoint: Url,
    token_endpoint: Url,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        let authorize_endpoint =
            Url::parse(&config.auth_url()).context("Invalid authorization endpoint")?;
        let token_endpoint = Url::parse(&config.token_url()).context("Invalid token endpoint")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            resource: config.oauth.resource.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            authorize_endpoint,
            token_endpoint,
            http_client,
        })
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// The provider posts the code back to the redirect URI (`response_mode=form_post`).
    pub fn generate_auth_url(&self, pkce: &PkceChallenge, state: &str) -> Url {
        let mut url = self.authorize_endpoint.clone();

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "form_post")
            .append_pair("resource", &self.resource)
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        url
    }

    /// POST a grant to the token endpoint and classify the answer.
    async fn request_token(
        &self,
        params: &[(&str, &str)],
        fail: fn(String) -> AuthError,
    ) -> TokenResponse {
        let response = match self
            .http_client
            .post(self.token_endpoint.clone())
            .form(params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return TokenResponse::Failure { reason: fail(e.to_string()) },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ProviderError>(&body).unwrap_or_default();
            // Log error details for operators (never shown to the user)
            tracing::warn!(
                status = status.as_u16(),
                error = %error.error,
                description = %error.error_description,
                "Token endpoint rejected the request"
            );
            let code = if error.error.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                error.error
            };
            return TokenResponse::Failure { reason: fail(code) };
        }

        match response.json::<RawTokenResponse>().await {
            Ok(raw) => TokenResponse::Success(raw.into()),
            Err(e) => TokenResponse::Failure { reason: fail(e.to_string()) },
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Client {
    fn authorization_request(&self) -> AuthorizationRequest {
        let pkce = PkceChallenge::new();
        let state = random_token(16);
        let url = self.generate_auth_url(&pkce, &state);

        AuthorizationRequest {
            url,
            state,
            code_verifier: pkce.verifier,
        }
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> TokenResponse {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("resource", self.resource.as_str()),
            ("code_verifier", code_verifier),
        ];

        self.request_token(&params, AuthError::TokenExchangeFailed)
            .await
    }

    #[tracing::instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> TokenResponse {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("resource", self.resource.as_str()),
        ];

        self.request_token(&params, AuthError::TokenRefreshFailed)
            .await
    }
}

/// Token endpoint success body.
#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    /// The v1 endpoint sends this as a string.
    #[serde(default)]
    expires_in: Option<Seconds>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    fn as_secs(&self) -> u64 {
        match self {
            Seconds::Number(n) => *n,
            Seconds::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

impl From<RawTokenResponse> for TokenPair {
    fn from(raw: RawTokenResponse) -> Self {
        TokenPair {
            access_token: SecureString::new(raw.access_token),
            refresh_token: raw.refresh_token.map(SecureString::new),
            expires_in: raw.expires_in.as_ref().map(Seconds::as_secs).unwrap_or(0),
        }
    }
}

/// Token endpoint error body.
#[derive(Debug, Default, Deserialize)]
struct ProviderError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}
