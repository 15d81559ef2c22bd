//! HTTP surface: routes, shared state, cookies and pages.

mod cookies;
pub mod pages;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::Key;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::graph::GraphClient;
use crate::auth::oauth::OAuth2Client;
use crate::auth::provider::IdentityProvider;
use crate::config::Config;
use crate::session::{MemorySessionStore, SessionStore};

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub directory: Arc<GraphClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub cookie_key: Key,
    pub secure_cookies: bool,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    /// Wire up the Azure AD client, the directory client and an in-memory session store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cookie_key = match &config.server.cookie_key {
            Some(key) => Key::try_from(key.as_str().as_bytes()).map_err(|_| {
                anyhow::anyhow!(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                )
            })?,
            None => {
                warn!("COOKIE_KEY not set, sessions will not survive a restart");
                Key::generate()
            }
        };

        Ok(Self {
            provider: Arc::new(OAuth2Client::new(config).context("Failed to create OAuth client")?),
            directory: Arc::new(GraphClient::new(config).context("Failed to create Graph client")?),
            sessions: Arc::new(MemorySessionStore::new(chrono::Duration::minutes(
                i64::from(config.server.session_idle_minutes),
            ))),
            cookie_key,
            secure_cookies: config.server.secure_cookies,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::landing))
        .route("/query", post(routes::query))
        .route("/secure", get(routes::secure))
        .route("/logout", get(routes::logout))
        .route("/auth", get(routes::begin_auth).post(routes::complete_auth))
        .route("/refresh", get(routes::refresh))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::graph::email_filter;
    use crate::auth::provider::testing::{FakeProvider, TEST_STATE};
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Router plus a tiny cookie-keeping browser.
    struct Harness {
        app: Router,
        store: Arc<MemorySessionStore>,
        provider: Arc<FakeProvider>,
        directory: MockServer,
        cookies: HashMap<String, String>,
    }

    impl Harness {
        async fn new(provider: FakeProvider) -> Self {
            let directory = MockServer::start().await;
            let store = Arc::new(MemorySessionStore::new(chrono::Duration::hours(8)));
            let provider = Arc::new(provider);

            let state = AppState {
                provider: provider.clone(),
                directory: Arc::new(
                    GraphClient::with_base_url(Url::parse(&directory.uri()).unwrap(), "contoso", "1.5")
                        .unwrap(),
                ),
                sessions: store.clone(),
                cookie_key: Key::generate(),
                secure_cookies: false,
            };

            Self {
                app: router(state),
                store,
                provider,
                directory,
                cookies: HashMap::new(),
            }
        }

        async fn send(&mut self, mut request: Request<Body>) -> Response<Body> {
            if !self.cookies.is_empty() {
                let cookie = self
                    .cookies
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                request
                    .headers_mut()
                    .insert(header::COOKIE, cookie.parse().unwrap());
            }

            let response = self.app.clone().oneshot(request).await.unwrap();

            for set_cookie in response.headers().get_all(header::SET_COOKIE) {
                let set_cookie = set_cookie.to_str().unwrap();
                let pair = set_cookie.split(';').next().unwrap();
                let (name, value) = pair.split_once('=').unwrap();
                if set_cookie.contains("Max-Age=0") {
                    self.cookies.remove(name);
                } else {
                    self.cookies.insert(name.to_string(), value.to_string());
                }
            }

            response
        }

        async fn get(&mut self, uri: &str) -> Response<Body> {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            self.send(request).await
        }

        async fn post_form(&mut self, uri: &str, form: &str) -> Response<Body> {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap();
            self.send(request).await
        }

        /// Run `/auth` and the provider callback.
        async fn sign_in(&mut self) -> Response<Body> {
            let response = self.get("/auth").await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            self.post_form("/auth", &format!("code=auth-code&state={}", TEST_STATE))
                .await
        }

        async fn tokens(&self) -> Vec<(String, String)> {
            self.store
                .snapshot()
                .await
                .into_iter()
                .map(|data| {
                    (
                        data.access_token.map(|t| t.as_str().to_string()).unwrap_or_default(),
                        data.refresh_token.map(|t| t.as_str().to_string()).unwrap_or_default(),
                    )
                })
                .collect()
        }
    }

    fn location(response: &Response<Body>) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .expect("redirect without Location")
            .to_str()
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn users_json() -> serde_json::Value {
        serde_json::json!({
            "value": [{
                "displayName": "Ada Lovelace",
                "givenName": "Ada",
                "surname": "Lovelace",
                "mail": "ada@contoso.com"
            }]
        })
    }

    #[tokio::test]
    async fn test_landing_page() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        let response = h.get("/").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("action=\"/query\""));
    }

    #[tokio::test]
    async fn test_health() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        let response = h.get("/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_anonymous_secure_redirects_without_downstream_call() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(0)
            .mount(&h.directory)
            .await;

        let response = h.get("/secure").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth");
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_begin_auth_redirects_to_provider() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        let response = h.get("/auth").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("https://login.example.test/"));
        assert!(h.cookies.contains_key("__aad_state"));
        assert!(h.cookies.contains_key("__aad_pkce"));
        assert_eq!(h.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_sign_in_secure_and_logout() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        Mock::given(method("GET"))
            .and(path("/contoso/users"))
            .and(header_is("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(1)
            .mount(&h.directory)
            .await;

        let response = h.get("/secure").await;
        assert_eq!(location(&response), "/auth");

        let response = h.sign_in().await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/secure");
        assert_eq!(h.tokens().await, vec![("AT1".to_string(), "RT1".to_string())]);
        assert!(h.cookies.contains_key("__aad_session"));
        assert!(!h.cookies.contains_key("__aad_state"));

        let response = h.get("/secure").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Display Name: Ada Lovelace"));
        assert!(body.contains("href='/logout'"));

        let response = h.get("/logout").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert!(h.tokens().await.is_empty());
        assert!(!h.cookies.contains_key("__aad_session"));

        let response = h.get("/secure").await;
        assert_eq!(location(&response), "/auth");
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_failed_code_exchange_leaves_session_unset() {
        let mut h = Harness::new(FakeProvider::failing()).await;

        let response = h.sign_in().await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert_eq!(h.provider.exchange_calls(), 1);
        assert!(h.tokens().await.is_empty());
        assert!(!h.cookies.contains_key("__aad_session"));
    }

    #[tokio::test]
    async fn test_callback_without_authorization_request() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;

        let response = h
            .post_form("/auth", &format!("code=auth-code&state={}", TEST_STATE))
            .await;

        assert_eq!(location(&response), "/");
        assert_eq!(h.provider.exchange_calls(), 0);
        assert!(h.tokens().await.is_empty());
    }

    #[tokio::test]
    async fn test_callback_code_is_single_use() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        h.sign_in().await;

        // Replaying the callback finds no pending authorization
        let response = h
            .post_form("/auth", &format!("code=auth-code&state={}", TEST_STATE))
            .await;

        assert_eq!(location(&response), "/");
        assert_eq!(h.provider.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn test_logout_when_anonymous() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        let response = h.get("/logout").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert!(h.tokens().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        let response = h.get("/refresh").await;

        assert_eq!(location(&response), "/auth");
        assert_eq!(h.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_tokens() {
        let mut h =
            Harness::new(FakeProvider::issuing("AT1", "RT1").refreshing("AT2", "RT2")).await;
        Mock::given(method("GET"))
            .and(header_is("authorization", "Bearer AT2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(1)
            .mount(&h.directory)
            .await;
        Mock::given(method("GET"))
            .and(header_is("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(0)
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        let response = h.get("/refresh").await;

        assert_eq!(location(&response), "/secure");
        assert_eq!(h.tokens().await, vec![("AT2".to_string(), "RT2".to_string())]);
        assert_eq!(h.provider.seen(), vec!["auth-code".to_string(), "RT1".to_string()]);

        let response = h.get("/secure").await;
        assert_eq!(response.status(), StatusCode::OK);
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_signs_out() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        h.sign_in().await;

        let response = h.get("/refresh").await;

        assert_eq!(location(&response), "/");
        assert!(h.tokens().await.is_empty());
        assert!(!h.cookies.contains_key("__aad_session"));
    }

    #[tokio::test]
    async fn test_query_requires_authentication() {
        let mut h = Harness::new(FakeProvider::failing()).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(0)
            .mount(&h.directory)
            .await;

        let response = h.post_form("/query", "email=ada%40contoso.com").await;

        assert_eq!(location(&response), "/auth");
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_query_filters_by_email() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        Mock::given(method("GET"))
            .and(path("/contoso/users"))
            .and(query_param("$filter", email_filter("ada@contoso.com").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .expect(1)
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        let response = h.post_form("/query", "email=+ada%40contoso.com+").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("ada@contoso.com"));
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_query_without_email() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        h.sign_in().await;

        let response = h.post_form("/query", "email=").await;
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_expired_token_goes_to_refresh() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        let response = h.get("/secure").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/refresh");
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_rejected_refreshed_token_does_not_loop() {
        let mut h =
            Harness::new(FakeProvider::issuing("AT1", "RT1").refreshing("AT2", "RT2")).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        let response = h.get("/secure").await;
        assert_eq!(location(&response), "/refresh");
        let response = h.get("/refresh").await;
        assert_eq!(location(&response), "/secure");

        let response = h.get("/secure").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("sign in again"));
        assert_eq!(h.provider.refresh_calls(), 1);
        h.directory.verify().await;
    }

    #[tokio::test]
    async fn test_accepted_token_allows_a_later_refresh() {
        let mut h =
            Harness::new(FakeProvider::issuing("AT1", "RT1").refreshing("AT2", "RT2")).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&h.directory)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_json()))
            .up_to_n_times(1)
            .mount(&h.directory)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        assert_eq!(location(&h.get("/secure").await), "/refresh");
        assert_eq!(location(&h.get("/refresh").await), "/secure");
        assert_eq!(h.get("/secure").await.status(), StatusCode::OK);

        // The accepted call resets the mark, so the next rejection refreshes again
        assert_eq!(location(&h.get("/secure").await), "/refresh");
    }

    #[tokio::test]
    async fn test_directory_failure_renders_error_page() {
        let mut h = Harness::new(FakeProvider::issuing("AT1", "RT1")).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal trace"))
            .mount(&h.directory)
            .await;

        h.sign_in().await;
        let response = h.get("/secure").await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(response).await;
        assert!(body.contains("could not be reached"));
        assert!(!body.contains("internal trace"));
        // The session survives a directory failure
        assert_eq!(h.tokens().await.len(), 1);
    }
}
