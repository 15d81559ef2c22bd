//! Per-browser session state.
//!
//! A [`Session`] is the explicit context a handler reads and mutates; the
//! [`SessionStore`] persists it between requests under an opaque id that the
//! browser carries in an encrypted cookie.

pub mod secure;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::auth::oauth::random_token;
use crate::auth::provider::TokenPair;
use crate::error::SessionError;
use secure::SecureString;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh, unguessable id.
    pub fn generate() -> Self {
        Self(random_token(32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Persisted session record.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub access_token: Option<SecureString>,
    pub refresh_token: Option<SecureString>,
    pub expires_at: Option<DateTime<Utc>>,
    /// The directory rejected the current credentials and a refresh was tried.
    pub token_rejected: bool,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Session store backing the browser sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionData>, SessionError>;

    async fn save(&self, id: &SessionId, data: SessionData) -> Result<(), SessionError>;

    async fn remove(&self, id: &SessionId) -> Result<(), SessionError>;
}

#[derive(Debug)]
struct StoredSession {
    data: SessionData,
    last_seen: DateTime<Utc>,
}

/// Process-local session store. Sessions do not survive a restart.
///
/// A record not loaded or saved within the idle timeout is evicted; expired
/// records are swept on every save.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    idle_timeout: Duration,
}

impl MemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    async fn load_at(&self, id: &SessionId, now: DateTime<Utc>) -> Option<SessionData> {
        let mut sessions = self.sessions.write().await;

        let idle = match sessions.get(id) {
            Some(stored) => now - stored.last_seen > self.idle_timeout,
            None => return None,
        };
        if idle {
            sessions.remove(id);
            tracing::debug!("Dropped idle session");
            return None;
        }

        let stored = sessions.get_mut(id)?;
        stored.last_seen = now;
        Some(stored.data.clone())
    }

    async fn save_at(&self, id: &SessionId, data: SessionData, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|_, stored| now - stored.last_seen <= self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }

        sessions.insert(
            id.clone(),
            StoredSession {
                data,
                last_seen: now,
            },
        );
    }

    /// Number of live sessions.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Copy of every stored record.
    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<SessionData> {
        self.sessions
            .read()
            .await
            .values()
            .map(|stored| stored.data.clone())
            .collect()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionData>, SessionError> {
        Ok(self.load_at(id, Utc::now()).await)
    }

    async fn save(&self, id: &SessionId, data: SessionData) -> Result<(), SessionError> {
        self.save_at(id, data, Utc::now()).await;
        Ok(())
    }

    async fn remove(&self, id: &SessionId) -> Result<(), SessionError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

/// What the browser cookie must become after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    Unchanged,
    Set(SessionId),
    Remove,
}

/// Session context for a single request.
#[derive(Debug, Default)]
pub struct Session {
    id: Option<SessionId>,
    /// Id given up by [`Session::rotate`], deleted on commit.
    retired: Option<SessionId>,
    data: SessionData,
    dirty: bool,
}

impl Session {
    /// Session without a stored record.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Load the session named by the browser's cookie.
    ///
    /// An unknown id yields an anonymous session whose stale cookie is
    /// dropped on the next commit.
    pub async fn load(
        store: &dyn SessionStore,
        id: Option<SessionId>,
    ) -> Result<Self, SessionError> {
        let Some(id) = id else {
            return Ok(Self::anonymous());
        };

        match store.load(&id).await? {
            Some(data) => Ok(Self {
                id: Some(id),
                retired: None,
                data,
                dirty: false,
            }),
            None => {
                tracing::debug!("Session cookie names no stored session");
                Ok(Self {
                    id: None,
                    retired: Some(id),
                    data: SessionData::default(),
                    dirty: true,
                })
            }
        }
    }

    pub fn access_token(&self) -> Option<&SecureString> {
        self.data.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&SecureString> {
        self.data.refresh_token.as_ref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.data.expires_at
    }

    /// Whether the access token's lifetime has run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.data.expires_at, Some(at) if at <= now)
    }

    /// Store a freshly issued token pair.
    ///
    /// Both tokens are replaced; a response without a refresh token keeps the
    /// previous one. A lifetime of zero, or one too large to represent,
    /// leaves the expiry unknown.
    pub fn set_tokens(&mut self, tokens: TokenPair, now: DateTime<Utc>) {
        self.data.access_token = Some(tokens.access_token);
        if let Some(refresh_token) = tokens.refresh_token {
            self.data.refresh_token = Some(refresh_token);
        }
        self.data.expires_at = match tokens.expires_in {
            0 => None,
            secs => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
        };
        self.dirty = true;
    }

    /// Note that the directory rejected the access token.
    ///
    /// Returns `false` when a rejection is already on record, meaning a
    /// refresh has been tried since the last accepted call.
    pub fn mark_token_rejected(&mut self) -> bool {
        if self.data.token_rejected {
            return false;
        }
        self.data.token_rejected = true;
        self.dirty = true;
        true
    }

    /// Note that the directory accepted the access token.
    pub fn mark_token_accepted(&mut self) {
        if self.data.token_rejected {
            self.data.token_rejected = false;
            self.dirty = true;
        }
    }

    /// Drop every token; the session becomes anonymous.
    pub fn clear(&mut self) {
        self.data = SessionData::default();
        self.dirty = true;
    }

    /// Move the session to a new id, retiring the current one.
    pub fn rotate(&mut self) {
        if let Some(id) = self.id.take() {
            self.retired = Some(id);
        }
        self.dirty = true;
    }

    #[cfg(test)]
    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Persist changes and report how the cookie has to change.
    pub async fn commit(mut self, store: &dyn SessionStore) -> Result<CookieUpdate, SessionError> {
        if !self.dirty {
            return Ok(CookieUpdate::Unchanged);
        }

        if let Some(retired) = self.retired.take() {
            store.remove(&retired).await?;
        }

        if self.data.is_empty() {
            if let Some(id) = self.id.take() {
                store.remove(&id).await?;
            }
            return Ok(CookieUpdate::Remove);
        }

        let (id, update) = match self.id.take() {
            Some(id) => (id, CookieUpdate::Unchanged),
            None => {
                let id = SessionId::generate();
                (id.clone(), CookieUpdate::Set(id))
            }
        };
        store.save(&id, std::mem::take(&mut self.data)).await?;

        Ok(update)
    }
}
