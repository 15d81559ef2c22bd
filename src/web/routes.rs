//! Route handlers. Each one loads the session, runs a sign-in transition or
//! directory call, commits the session and answers.

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use axum_extra::extract::PrivateCookieJar;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{cookies, pages, AppState};
use crate::auth::flow::{AuthFlow, AuthState, CallbackParams, Location};
use crate::auth::graph::email_filter;
use crate::error::{AppError, DirectoryError};
use crate::session::secure::SecureString;
use crate::session::Session;

// ── Public ─────────────────────────────────────────────────────────

pub(super) async fn landing() -> Html<String> {
    Html(pages::landing())
}

pub(super) async fn health() -> &'static str {
    "ok"
}

// ── Protected ──────────────────────────────────────────────────────

pub(super) async fn secure(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let session = load_session(&state, &jar).await?;

    let access_token = match AuthFlow::require_access_token(&session, Utc::now()) {
        Ok(token) => token,
        Err(location) => return Ok(redirect(&location).into_response()),
    };

    phone_book(&state, jar, session, &access_token, None).await
}

#[derive(Deserialize)]
pub(super) struct QueryForm {
    email: Option<String>,
}

pub(super) async fn query(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<QueryForm>,
) -> Result<Response, AppError> {
    let session = load_session(&state, &jar).await?;

    let access_token = match AuthFlow::require_access_token(&session, Utc::now()) {
        Ok(token) => token,
        Err(location) => return Ok(redirect(&location).into_response()),
    };

    let email = form
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    let Some(email) = email else {
        return Ok(redirect(&Location::Landing).into_response());
    };

    phone_book(&state, jar, session, &access_token, Some(email_filter(&email))).await
}

async fn phone_book(
    state: &AppState,
    jar: PrivateCookieJar,
    mut session: Session,
    access_token: &SecureString,
    filter: Option<String>,
) -> Result<Response, AppError> {
    match state
        .directory
        .list_users(access_token.as_str(), filter.as_deref())
        .await
    {
        Ok(users) => {
            session.mark_token_accepted();
            let jar = commit(state, jar, session).await?;
            Ok((jar, Html(pages::phone_book(&users))).into_response())
        }
        Err(DirectoryError::Unauthorized) => match AuthFlow::directory_rejected(&mut session) {
            Some(location) => {
                info!("Directory rejected the access token, refreshing");
                Ok(finish(state, jar, session, &location).await?.into_response())
            }
            None => {
                warn!("Directory rejected the access token again after a refresh");
                Err(DirectoryError::Unauthorized.into())
            }
        },
        Err(e) => Err(e.into()),
    }
}

// ── Sign-in flow ───────────────────────────────────────────────────

pub(super) async fn begin_auth(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let (pending, location) = AuthFlow::new(state.provider.as_ref()).begin();
    let (state_cookie, pkce_cookie) = cookies::pending_cookies(&pending, state.secure_cookies);

    (jar.add(state_cookie).add(pkce_cookie), redirect(&location))
}

pub(super) async fn complete_auth(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(params): Form<CallbackParams>,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    // The pending authorization is single-use whatever the outcome
    let pending = cookies::get_pending(&jar);
    let (clear_state, clear_pkce) = cookies::clear_pending_cookies();
    let jar = jar.remove(clear_state).remove(clear_pkce);

    let mut session = load_session(&state, &jar).await?;
    debug!(state = ?AuthState::of(&session, pending.as_ref()), "Sign-in callback received");
    let location = AuthFlow::new(state.provider.as_ref())
        .complete(&mut session, pending, params, Utc::now())
        .await;

    finish(&state, jar, session, &location).await
}

pub(super) async fn refresh(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let mut session = load_session(&state, &jar).await?;
    let location = AuthFlow::new(state.provider.as_ref())
        .refresh(&mut session, Utc::now())
        .await;

    finish(&state, jar, session, &location).await
}

pub(super) async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let mut session = load_session(&state, &jar).await?;
    let location = AuthFlow::logout(&mut session);
    info!("Signed out");

    finish(&state, jar, session, &location).await
}

// ── Helpers ────────────────────────────────────────────────────────

async fn load_session(state: &AppState, jar: &PrivateCookieJar) -> Result<Session, AppError> {
    Ok(Session::load(state.sessions.as_ref(), cookies::get_session_id(jar)).await?)
}

/// Persist the session and carry the cookie change into the jar.
async fn commit(
    state: &AppState,
    jar: PrivateCookieJar,
    session: Session,
) -> Result<PrivateCookieJar, AppError> {
    let update = session.commit(state.sessions.as_ref()).await?;
    Ok(cookies::apply(jar, update, state.secure_cookies))
}

/// Persist the session and pair the updated jar with the redirect.
async fn finish(
    state: &AppState,
    jar: PrivateCookieJar,
    session: Session,
    location: &Location,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let jar = commit(state, jar, session).await?;
    Ok((jar, redirect(location)))
}

fn redirect(location: &Location) -> Redirect {
    Redirect::to(location.as_str())
}
