//! The narrow interface the sign-in flow uses to talk to the identity provider.

use async_trait::async_trait;
use url::Url;

use crate::error::AuthError;
use crate::session::secure::SecureString;

/// Tokens issued by a successful exchange.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecureString,
    /// Azure AD always reissues one, but the field is optional in the protocol.
    pub refresh_token: Option<SecureString>,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

/// Result of any exchange request (authorization code or refresh token).
#[derive(Debug)]
pub enum TokenResponse {
    Success(TokenPair),
    Failure { reason: AuthError },
}

/// Everything needed to send the browser to the provider and verify the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    /// Opaque CSRF value echoed back by the provider.
    pub state: String,
    /// PKCE verifier presented again at code exchange.
    pub code_verifier: String,
}

/// Identity provider client.
///
/// Exchanges never retry: authorization codes are single-use and every
/// failure is reported as [`TokenResponse::Failure`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build a fresh authorization request with new state and PKCE values.
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> TokenResponse;

    /// Mint new tokens from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> TokenResponse;
}
