//! Azure AD authentication module.
//!
//! Provides the sign-in state machine, the OAuth2 client that talks to the
//! identity provider, and the Graph client for the user directory.

pub mod flow;
pub mod graph;
pub mod oauth;
pub mod provider;
