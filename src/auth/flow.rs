//! Sign-in state machine.
//!
//! Per browser session the flow is `Anonymous -> Authenticating ->
//! Authenticated -> Anonymous`. The state is derived from the session record
//! and the pending authorization cookie; every transition ends in a
//! redirect [`Location`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::provider::{IdentityProvider, TokenResponse};
use crate::error::AuthError;
use crate::session::secure::SecureString;
use crate::session::Session;

/// Sign-in state of one browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No tokens.
    Anonymous,
    /// Sent to the provider, waiting for the callback.
    Authenticating,
    /// Holds an access token.
    Authenticated,
}

impl AuthState {
    pub fn of(session: &Session, pending: Option<&PendingAuthorization>) -> Self {
        if session.access_token().is_some() {
            AuthState::Authenticated
        } else if pending.is_some() {
            AuthState::Authenticating
        } else {
            AuthState::Anonymous
        }
    }
}

/// Where a transition sends the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Public landing page.
    Landing,
    /// Start of the sign-in flow.
    SignIn,
    /// Token refresh.
    Refresh,
    /// The protected phone book.
    Secure,
    /// The provider's authorization endpoint.
    Provider(Url),
}

impl Location {
    pub fn as_str(&self) -> &str {
        match self {
            Location::Landing => "/",
            Location::SignIn => "/auth",
            Location::Refresh => "/refresh",
            Location::Secure => "/secure",
            Location::Provider(url) => url.as_str(),
        }
    }
}

/// State and PKCE verifier minted when entering `Authenticating`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
}

/// Form fields the provider posts back to the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Drives the transitions against an identity provider.
pub struct AuthFlow<'a> {
    provider: &'a dyn IdentityProvider,
}

impl<'a> AuthFlow<'a> {
    pub fn new(provider: &'a dyn IdentityProvider) -> Self {
        Self { provider }
    }

    /// `Anonymous -> Authenticating`: build the provider redirect.
    ///
    /// Nothing is written to the session; the caller keeps the returned
    /// pending authorization until the callback arrives.
    pub fn begin(&self) -> (PendingAuthorization, Location) {
        let request = self.provider.authorization_request();
        let pending = PendingAuthorization {
            state: request.state,
            code_verifier: request.code_verifier,
        };
        (pending, Location::Provider(request.url))
    }

    /// `Authenticating -> Authenticated` on a provider callback.
    ///
    /// The code is exchanged at most once. Any failure leaves the session
    /// untouched and sends the browser to the landing page.
    pub async fn complete(
        &self,
        session: &mut Session,
        pending: Option<PendingAuthorization>,
        callback: CallbackParams,
        now: DateTime<Utc>,
    ) -> Location {
        let (code, code_verifier) = match Self::validate_callback(pending, callback) {
            Ok(checked) => checked,
            Err(reason) => {
                warn!(error = %reason, "Rejected authorization callback");
                return Location::Landing;
            }
        };

        match self.provider.exchange_code(&code, &code_verifier).await {
            TokenResponse::Success(tokens) => {
                // New id for the newly authenticated session
                session.rotate();
                session.set_tokens(tokens, now);
                info!(expires_at = ?session.expires_at(), "Sign-in successful");
                Location::Secure
            }
            TokenResponse::Failure { reason } => {
                warn!(error = %reason, "Authorization code exchange failed");
                Location::Landing
            }
        }
    }

    fn validate_callback(
        pending: Option<PendingAuthorization>,
        callback: CallbackParams,
    ) -> Result<(String, String), AuthError> {
        if let Some(error) = callback.error {
            let description = callback.error_description.unwrap_or_else(|| error.clone());
            return Err(AuthError::OAuthFailed(description));
        }

        let pending = pending.ok_or(AuthError::NoPendingAuthorization)?;

        if callback.state.as_deref() != Some(pending.state.as_str()) {
            return Err(AuthError::StateValidationFailed);
        }

        let code = callback
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::InvalidAuthCode)?;

        Ok((code, pending.code_verifier))
    }

    /// `Authenticated -> Authenticated` using the refresh token.
    ///
    /// Without a refresh token the user has to sign in again. A rejected
    /// refresh clears the session.
    pub async fn refresh(&self, session: &mut Session, now: DateTime<Utc>) -> Location {
        let Some(refresh_token) = session.refresh_token().cloned() else {
            return Location::SignIn;
        };

        match self.provider.refresh(refresh_token.as_str()).await {
            TokenResponse::Success(tokens) => {
                session.set_tokens(tokens, now);
                info!(expires_at = ?session.expires_at(), "Access token refreshed");
                Location::Secure
            }
            TokenResponse::Failure { reason } => {
                warn!(error = %reason, "Token refresh failed, signing out");
                session.clear();
                Location::Landing
            }
        }
    }

    /// `Authenticated -> Anonymous`.
    pub fn logout(session: &mut Session) -> Location {
        session.clear();
        Location::Landing
    }

    /// Gate for protected resources.
    ///
    /// Returns the access token to use, or where to send the browser
    /// instead. No downstream call may happen on `Err`.
    pub fn require_access_token(
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SecureString, Location> {
        let Some(access_token) = session.access_token() else {
            return Err(Location::SignIn);
        };

        if session.is_expired(now) {
            return Err(if session.refresh_token().is_some() {
                Location::Refresh
            } else {
                Location::SignIn
            });
        }

        Ok(access_token.clone())
    }

    /// The directory rejected the access token.
    ///
    /// The first rejection sends the browser to refresh. A second one before
    /// any accepted call yields `None` and the failure is shown instead.
    pub fn directory_rejected(session: &mut Session) -> Option<Location> {
        session.mark_token_rejected().then_some(Location::Refresh)
    }
}
