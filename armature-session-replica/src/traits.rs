//! Session record and session store trait definitions.

use crate::error::{StoreError, StoreResult};
use crate::store::StoreEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// A value the store can persist as a session.
///
/// The store treats sessions as opaque apart from the optional cookie
/// lifetime hint, which feeds TTL derivation.
pub trait SessionRecord: Send + Sync + 'static {
    /// Remaining cookie lifetime in milliseconds, if the session carries one.
    fn max_age_ms(&self) -> Option<i64> {
        None
    }
}

/// Cookie settings carried by a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    /// Remaining lifetime in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
    /// Absolute expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// Cookie path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Cookie domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// HttpOnly flag
    #[serde(default)]
    pub http_only: bool,
    /// Secure flag
    #[serde(default)]
    pub secure: bool,
    /// SameSite policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl SessionCookie {
    /// Cookie that lives for `max_age_ms` milliseconds.
    pub fn with_max_age(max_age_ms: i64) -> Self {
        Self {
            max_age: Some(max_age_ms),
            http_only: true,
            path: Some("/".to_string()),
            ..Default::default()
        }
    }
}

/// Session data as handed over by the session middleware.
///
/// Serializes as a flat JSON object: the `cookie` field next to whatever data
/// the application stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Cookie settings
    #[serde(default)]
    pub cookie: SessionCookie,
    /// Session data as key-value pairs
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Session {
    /// Create an empty session with the given cookie.
    pub fn new(cookie: SessionCookie) -> Self {
        Self {
            cookie,
            data: Map::new(),
        }
    }

    /// Get a value from the session data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in the session data.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> StoreResult<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.data.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Remove a value from the session data.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists in the session data.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl SessionRecord for Session {
    fn max_age_ms(&self) -> Option<i64> {
        self.cookie.max_age
    }
}

impl SessionRecord for Value {
    fn max_age_ms(&self) -> Option<i64> {
        let max_age = self.pointer("/cookie/maxAge")?;
        max_age
            .as_i64()
            .or_else(|| max_age.as_f64().filter(|ms| ms.is_finite()).map(|ms| ms.floor() as i64))
    }
}

/// Session store contract expected by the session middleware.
///
/// # Examples
///
/// ```ignore
/// use armature_session_replica::{Session, SessionStore, StoreResult};
///
/// async fn example(store: &impl SessionStore) -> StoreResult<()> {
///     let mut session = Session::default();
///     session.set("user_id", 123)?;
///     store.set("sid-1", &session).await?;
///
///     let session = store.get("sid-1").await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SessionStore<S: SessionRecord = Session>: Send + Sync {
    /// Get a session by ID.
    ///
    /// Returns `Ok(None)` when no backend holds the session.
    async fn get(&self, sid: &str) -> StoreResult<Option<S>>;

    /// Save a session.
    async fn set(&self, sid: &str, session: &S) -> StoreResult<()>;

    /// Delete a session.
    async fn destroy(&self, sid: &str) -> StoreResult<()>;

    /// Refresh a session's expiration without rewriting it.
    async fn touch(&self, sid: &str, session: &S) -> StoreResult<()>;

    /// Number of distinct sessions across all backends.
    async fn length(&self) -> StoreResult<usize>;

    /// Delete all sessions (use with caution!).
    async fn clear(&self) -> StoreResult<()>;

    /// Close all backend connections.
    fn close(&self);

    /// Receive backend lifecycle notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Field-level helpers for stores holding [`Session`] values.
#[async_trait]
pub trait SessionStoreExt: SessionStore<Session> {
    /// Get a session value by key.
    async fn get_value<T: for<'de> Deserialize<'de>>(
        &self,
        sid: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        Ok(self.get(sid).await?.and_then(|session| session.get(key)))
    }

    /// Set a session value by key. Does nothing if the session does not exist.
    async fn set_value<T: Serialize + Send>(&self, sid: &str, key: &str, value: T) -> StoreResult<()> {
        if let Some(mut session) = self.get(sid).await? {
            session.set(key, value)?;
            self.set(sid, &session).await?;
        }
        Ok(())
    }
}

impl<T: SessionStore<Session> + ?Sized> SessionStoreExt for T {}
