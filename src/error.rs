//! Error types for the aad-phonebook application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

use crate::web::pages;

/// Top-level error type for request handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Reasons a token exchange with the identity provider did not succeed.
///
/// These are only ever logged; the browser sees a redirect to the landing page.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Missing authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("No authorization request in progress")]
    NoPendingAuthorization,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,
}

/// Directory (Azure AD Graph) errors.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse directory response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

/// Session store errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    /// Returns a user-friendly message for the error page.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Directory(DirectoryError::Forbidden) => {
                "You are not allowed to read the directory."
            }
            Self::Directory(DirectoryError::RateLimited) => {
                "Too many requests. Please wait a moment."
            }
            Self::Directory(DirectoryError::Unauthorized) => {
                "Your session has expired. Please sign in again."
            }
            Self::Directory(_) => "The directory could not be reached. Please try again.",
            Self::Session(_) => "Your session could not be loaded. Please try again.",
        }
    }

    /// HTTP status used when rendering the error page.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Directory(DirectoryError::Forbidden) => StatusCode::FORBIDDEN,
            Self::Directory(DirectoryError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            Self::Directory(DirectoryError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Self::Directory(_) => StatusCode::BAD_GATEWAY,
            Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Details stay in the log, never in the page
        tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        (status, Html(pages::error_page(status, self.user_message()))).into_response()
    }
}
