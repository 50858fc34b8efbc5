//! In-process backend for exercising the replicated store without Redis.

#![allow(dead_code)]

use armature_session_replica::{BackendError, BackendEvent, BackendResult, BackendState, SessionBackend};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Stored value and the TTL it was written with.
type Entry = (Vec<u8>, Option<u64>);

/// Backend keeping everything in memory, recording every call.
pub struct MockBackend {
    name: String,
    data: Mutex<HashMap<String, Entry>>,
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<BackendError>>,
    delay: Mutex<Duration>,
    state: Mutex<BackendState>,
    keepalive: Mutex<Option<bool>>,
    events: broadcast::Sender<BackendEvent>,
}

impl MockBackend {
    /// A ready backend.
    pub fn new(name: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            name: name.to_string(),
            data: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            state: Mutex::new(BackendState::Ready),
            keepalive: Mutex::new(None),
            events,
        })
    }

    /// A backend whose every call fails with `err`.
    pub fn failing(name: &str, err: BackendError) -> Arc<Self> {
        let backend = Self::new(name);
        backend.fail_with(Some(err));
        backend
    }

    /// A backend that never connected.
    pub fn unreachable(name: &str) -> Arc<Self> {
        let backend = Self::failing(
            name,
            BackendError::Connection(format!("connect ECONNREFUSED {}", name)),
        );
        *backend.state.lock().unwrap() = BackendState::Disconnected;
        backend
    }

    pub fn fail_with(&self, err: Option<BackendError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), None));
    }

    pub fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).map(|(value, _)| value.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<Option<u64>> {
        self.data.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keepalive(&self) -> Option<bool> {
        *self.keepalive.lock().unwrap()
    }

    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    pub fn as_backend(self: &Arc<Self>) -> Arc<dyn SessionBackend> {
        Arc::clone(self) as Arc<dyn SessionBackend>
    }

    async fn call(&self, command: &str, key: &str) -> BackendResult<()> {
        self.calls.lock().unwrap().push(format!("{} {}", command, key));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if *self.state.lock().unwrap() == BackendState::Closed {
            return Err(BackendError::Closed(command.to_string()));
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> BackendState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> BoxStream<'static, BackendEvent> {
        futures::stream::unfold(self.events.subscribe(), |mut events| async move {
            loop {
                match events.recv().await {
                    Ok(event) => return Some((event, events)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    fn start(self: Arc<Self>, keepalive: bool) {
        *self.keepalive.lock().unwrap() = Some(keepalive);
        if self.state() == BackendState::Ready {
            self.emit(BackendEvent::Connect);
            self.emit(BackendEvent::Ready);
        }
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.call("GET", key).await?;
        Ok(self.stored(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> BackendResult<()> {
        self.call("SET", key).await?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.call("DEL", key).await?;
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> BackendResult<()> {
        self.call("EXPIRE", key).await?;
        if let Some(entry) = self.data.lock().unwrap().get_mut(key) {
            entry.1 = Some(ttl_secs);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        self.call("KEYS", pattern).await?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|key| matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn wipe(&self, pattern: &str) -> BackendResult<()> {
        self.call("WIPE", pattern).await?;
        self.data.lock().unwrap().retain(|key, _| !matches(pattern, key));
        Ok(())
    }

    fn close(&self) {
        *self.state.lock().unwrap() = BackendState::Closed;
    }
}
