//! Private cookies: the session id and the pending authorization.

use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::PrivateCookieJar;
use time::Duration;

use crate::auth::flow::PendingAuthorization;
use crate::session::{CookieUpdate, SessionId};

const SESSION_COOKIE_NAME: &str = "__aad_session";
const STATE_COOKIE_NAME: &str = "__aad_state";
const PKCE_COOKIE_NAME: &str = "__aad_pkce";

/// Path of the sign-in endpoints; the pending-authorization cookies live here.
const AUTH_PATH: &str = "/auth";

/// Create state + PKCE verifier cookies for an authorization request.
///
/// The provider posts the callback cross-site, so over HTTPS these are
/// `SameSite=None; Secure`. Over plain HTTP a `SameSite=None` cookie without
/// `Secure` is rejected, so the attribute is left out and the browser's
/// default applies.
pub(super) fn pending_cookies(
    pending: &PendingAuthorization,
    secure: bool,
) -> (Cookie<'static>, Cookie<'static>) {
    (
        pending_cookie(STATE_COOKIE_NAME, pending.state.clone(), secure),
        pending_cookie(PKCE_COOKIE_NAME, pending.code_verifier.clone(), secure),
    )
}

fn pending_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .http_only(true)
        .path(AUTH_PATH)
        .max_age(Duration::minutes(10));
    if secure {
        builder = builder.secure(true).same_site(SameSite::None);
    }
    builder.build()
}

/// Create removal cookies for state + PKCE verifier.
pub(super) fn clear_pending_cookies() -> (Cookie<'static>, Cookie<'static>) {
    let state = Cookie::build((STATE_COOKIE_NAME, ""))
        .path(AUTH_PATH)
        .max_age(Duration::ZERO)
        .build();

    let verifier = Cookie::build((PKCE_COOKIE_NAME, ""))
        .path(AUTH_PATH)
        .max_age(Duration::ZERO)
        .build();

    (state, verifier)
}

/// Read the pending authorization, if a sign-in is in progress.
pub(super) fn get_pending(jar: &PrivateCookieJar) -> Option<PendingAuthorization> {
    let state = jar.get(STATE_COOKIE_NAME)?.value().to_string();
    let code_verifier = jar.get(PKCE_COOKIE_NAME)?.value().to_string();
    Some(PendingAuthorization {
        state,
        code_verifier,
    })
}

/// Session cookie; lives as long as the browser session.
fn session_cookie(id: &SessionId, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, id.as_str().to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

pub(super) fn get_session_id(jar: &PrivateCookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| SessionId::from(c.value().to_string()))
}

/// Apply the outcome of a session commit to the jar.
pub(super) fn apply(jar: PrivateCookieJar, update: CookieUpdate, secure: bool) -> PrivateCookieJar {
    match update {
        CookieUpdate::Unchanged => jar,
        CookieUpdate::Set(id) => jar.add(session_cookie(&id, secure)),
        CookieUpdate::Remove => jar.remove(clear_session_cookie()),
    }
}
