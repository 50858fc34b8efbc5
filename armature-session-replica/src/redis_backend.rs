//! Redis replicas for the session store.

use crate::backend::{BackendEvent, BackendState, SessionBackend};
use crate::config::StoreConfig;
use crate::error::{BackendError, BackendResult, StoreError, StoreResult};
use crate::store::ReplicatedSessionStore;
use crate::traits::SessionRecord;
use armature_redis_handle::{ConnectionState, HandleEvent, RedisError, RedisHandle};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

impl From<RedisError> for BackendError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::NotReady(command) => BackendError::NotReady(command.to_string()),
            RedisError::Closed(command) => BackendError::Closed(command.to_string()),
            RedisError::Connection(msg) => BackendError::Connection(msg),
            RedisError::Timeout => BackendError::Timeout,
            RedisError::Command(msg) | RedisError::Config(msg) => BackendError::Command(msg),
        }
    }
}

impl From<ConnectionState> for BackendState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => BackendState::Disconnected,
            ConnectionState::Connecting => BackendState::Connecting,
            ConnectionState::Connected => BackendState::Connected,
            ConnectionState::Ready => BackendState::Ready,
            ConnectionState::Closed => BackendState::Closed,
        }
    }
}

#[async_trait]
impl SessionBackend for RedisHandle {
    fn name(&self) -> &str {
        RedisHandle::name(self)
    }

    fn state(&self) -> BackendState {
        RedisHandle::state(self).into()
    }

    fn events(&self) -> BoxStream<'static, BackendEvent> {
        futures::stream::unfold(self.subscribe(), |mut events| async move {
            loop {
                let event = match events.recv().await {
                    Ok(HandleEvent::Connect) => BackendEvent::Connect,
                    Ok(HandleEvent::Ready) => BackendEvent::Ready,
                    Ok(HandleEvent::Error(err)) => BackendEvent::Error(err.into()),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                };
                return Some((event, events));
            }
        })
        .boxed()
    }

    fn start(self: Arc<Self>, keepalive: bool) {
        RedisHandle::connect(&self, keepalive);
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(RedisHandle::get(self, key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> BackendResult<()> {
        Ok(RedisHandle::set(self, key, value, ttl_secs).await?)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        RedisHandle::del(self, key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> BackendResult<()> {
        RedisHandle::expire(self, key, ttl_secs).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        Ok(RedisHandle::keys(self, pattern).await?)
    }

    async fn wipe(&self, pattern: &str) -> BackendResult<()> {
        RedisHandle::delete_matching(self, pattern).await?;
        Ok(())
    }

    fn close(&self) {
        RedisHandle::close(self);
    }
}

impl<S: SessionRecord + Serialize + DeserializeOwned> ReplicatedSessionStore<S> {
    /// Build a store with one Redis connection handle per configured backend.
    ///
    /// Nothing connects until [`ReplicatedSessionStore::start`]; subscribe
    /// before starting to see every `Connect` and `Ready` notification.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use armature_session_replica::*;
    ///
    /// # async fn example() -> StoreResult<()> {
    /// let config = StoreConfig::builder()
    ///     .backend(RedisConfig::new("redis://localhost:6379"))
    ///     .ttl(TtlPolicy::Fixed(3600))
    ///     .build();
    /// let store: ReplicatedSessionStore = ReplicatedSessionStore::redis(config)?;
    /// let _events = store.subscribe();
    /// store.start();
    /// # Ok(())
    /// # }
    /// ```
    pub fn redis(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;

        let backends = config
            .backends
            .iter()
            .map(|options| {
                RedisHandle::new(options.clone())
                    .map(|handle| handle as Arc<dyn SessionBackend>)
                    .map_err(|e| StoreError::Config(e.to_string()))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Self::new(config, backends)
    }
}
