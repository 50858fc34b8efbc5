//! Session store replicated across independent backends.

use crate::backend::{BackendEvent, BackendHandle, BackendState};
use crate::config::StoreConfig;
use crate::error::{BackendError, StoreError, StoreResult};
use crate::fanout::{FirstWithData, UnionKeys, WaitForAll, dispatch};
use crate::serializer::{JsonSerializer, SessionSerializer};
use crate::traits::{Session, SessionRecord, SessionStore};
use crate::ttl::Ttl;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the store notification channel.
const EVENT_CAPACITY: usize = 256;

/// Backend lifecycle notification re-published by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A backend connected
    Connect {
        /// Originating backend
        backend: String,
    },
    /// A backend is ready for commands
    Ready {
        /// Originating backend
        backend: String,
    },
    /// A backend reported a connection-level error
    Error {
        /// Originating backend
        backend: String,
        /// The error
        error: BackendError,
    },
}

impl StoreEvent {
    /// Name of the backend the notification came from.
    pub fn backend(&self) -> &str {
        match self {
            Self::Connect { backend } | Self::Ready { backend } | Self::Error { backend, .. } => {
                backend
            }
        }
    }
}

/// Connectivity of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHealth {
    /// Backend name
    pub name: String,
    /// Current state
    pub state: BackendState,
}

/// Session store writing every session to all configured backends.
///
/// Reads are answered by the first backend holding the session, writes and
/// deletes must reach every backend, and [`SessionStore::length`] counts the
/// distinct sessions across all of them. The backends are independent
/// replicas; nothing keeps them consistent with each other.
///
/// Backends start connecting on [`ReplicatedSessionStore::start`], so
/// receivers from [`SessionStore::subscribe`] taken before that see every
/// lifecycle notification.
///
/// # Examples
///
/// ```no_run
/// use armature_session_replica::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), StoreError> {
///     let config = StoreConfig::builder()
///         .backend(RedisConfig::new("redis://localhost:6379"))
///         .backend(RedisConfig::new("redis://localhost:6380"))
///         .key_prefix("myapp")
///         .build();
///
///     let store: ReplicatedSessionStore = ReplicatedSessionStore::redis(config)?;
///     store.start();
///
///     let mut session = Session::new(SessionCookie::with_max_age(3_600_000));
///     session.set("user_id", 123)?;
///     store.set("sid-1", &session).await?;
///
///     if let Some(session) = store.get("sid-1").await? {
///         let user_id: Option<i32> = session.get("user_id");
///         println!("User ID: {:?}", user_id);
///     }
///
///     store.close();
///     Ok(())
/// }
/// ```
pub struct ReplicatedSessionStore<S: SessionRecord = Session> {
    backends: Vec<BackendHandle>,
    config: StoreConfig,
    serializer: Arc<dyn SessionSerializer<S>>,
    events: broadcast::Sender<StoreEvent>,
    relays: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
    started: AtomicBool,
}

impl<S: SessionRecord + Serialize + DeserializeOwned> ReplicatedSessionStore<S> {
    /// Create a store over `backends` using the JSON serializer.
    ///
    /// Must be called within a Tokio runtime. Backends are not started until
    /// [`ReplicatedSessionStore::start`].
    pub fn new(config: StoreConfig, backends: Vec<BackendHandle>) -> StoreResult<Self> {
        Self::with_serializer(config, backends, Arc::new(JsonSerializer))
    }
}

impl<S: SessionRecord> ReplicatedSessionStore<S> {
    /// Create a store over `backends` with a custom serializer.
    pub fn with_serializer(
        config: StoreConfig,
        backends: Vec<BackendHandle>,
        serializer: Arc<dyn SessionSerializer<S>>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Config("the session store must be created within a Tokio runtime".into())
        })?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let relays = backends
            .iter()
            .map(|backend| {
                let name = backend.name().to_string();
                runtime.spawn(relay(name, backend.events(), events.clone()))
            })
            .collect();

        debug!(
            backends = backends.len(),
            prefix = %config.key_prefix,
            ttl = ?config.ttl,
            "Replicated session store created"
        );

        Ok(Self {
            backends,
            config,
            serializer,
            events,
            relays: Mutex::new(relays),
            runtime,
            started: AtomicBool::new(false),
        })
    }

    /// Start connecting every backend. Later calls do nothing.
    ///
    /// Subscribe first to observe the initial `Connect` and `Ready`
    /// notifications.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let _runtime = self.runtime.enter();
        for backend in &self.backends {
            Arc::clone(backend).start(!self.config.defer_keepalive);
        }
        debug!(backends = self.backends.len(), "Backends started");
    }

    /// Whether [`ReplicatedSessionStore::start`] has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connectivity of every backend, in configured order.
    pub fn health(&self) -> Vec<BackendHealth> {
        self.backends
            .iter()
            .map(|backend| BackendHealth {
                name: backend.name().to_string(),
                state: backend.state(),
            })
            .collect()
    }

    /// Number of configured backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    fn stop_relays(&self) {
        for relay in self.relays.lock().drain(..) {
            relay.abort();
        }
    }
}

#[async_trait]
impl<S: SessionRecord> SessionStore<S> for ReplicatedSessionStore<S> {
    async fn get(&self, sid: &str) -> StoreResult<Option<S>> {
        let key = self.config.session_key(sid);
        debug!(sid, "get");

        let found = dispatch(&self.backends, FirstWithData, move |backend| {
            let key = key.clone();
            async move { backend.get(&key).await }
        })
        .await?;

        match found {
            Some(bytes) => self.serializer.decode(&bytes).map(Some).inspect_err(|err| {
                debug!(sid, error = %err, "Stored session could not be decoded");
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, sid: &str, session: &S) -> StoreResult<()> {
        let payload: Arc<[u8]> = self
            .serializer
            .encode(session)
            .inspect_err(|err| debug!(sid, error = %err, "Session could not be encoded"))?
            .into();
        let ttl = self.config.ttl.resolve(session).as_secs();
        let key = self.config.session_key(sid);
        debug!(sid, ttl, "set");

        dispatch(&self.backends, WaitForAll, move |backend| {
            let key = key.clone();
            let payload = Arc::clone(&payload);
            async move { backend.set(&key, &payload, ttl).await }
        })
        .await
    }

    async fn destroy(&self, sid: &str) -> StoreResult<()> {
        let key = self.config.session_key(sid);
        debug!(sid, "destroy");

        dispatch(&self.backends, WaitForAll, move |backend| {
            let key = key.clone();
            async move { backend.delete(&key).await }
        })
        .await
    }

    async fn touch(&self, sid: &str, session: &S) -> StoreResult<()> {
        let ttl = match self.config.ttl.resolve(session) {
            Ttl::Disabled => {
                debug!(sid, "touch, ttl is disabled");
                return Ok(());
            }
            Ttl::Seconds(secs) => secs,
        };
        let key = self.config.session_key(sid);
        debug!(sid, ttl, "touch");

        dispatch(&self.backends, WaitForAll, move |backend| {
            let key = key.clone();
            async move { backend.expire(&key, ttl).await }
        })
        .await
    }

    async fn length(&self) -> StoreResult<usize> {
        let pattern = self.config.key_pattern();
        debug!(%pattern, "length");

        dispatch(&self.backends, UnionKeys::default(), move |backend| {
            let pattern = pattern.clone();
            async move { backend.keys(&pattern).await }
        })
        .await
    }

    async fn clear(&self) -> StoreResult<()> {
        let pattern = self.config.key_pattern();
        debug!(%pattern, "clear");

        dispatch(&self.backends, WaitForAll, move |backend| {
            let pattern = pattern.clone();
            async move { backend.wipe(&pattern).await }
        })
        .await
    }

    fn close(&self) {
        debug!("close");
        for backend in &self.backends {
            backend.close();
        }
        self.stop_relays();
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

impl<S: SessionRecord> Drop for ReplicatedSessionStore<S> {
    fn drop(&mut self) {
        self.stop_relays();
    }
}

/// Forward one backend's lifecycle notifications, tagged with its name.
async fn relay(
    backend: String,
    mut events: futures::stream::BoxStream<'static, BackendEvent>,
    store: broadcast::Sender<StoreEvent>,
) {
    while let Some(event) = events.next().await {
        let event = match event {
            BackendEvent::Connect => StoreEvent::Connect {
                backend: backend.clone(),
            },
            BackendEvent::Ready => StoreEvent::Ready {
                backend: backend.clone(),
            },
            BackendEvent::Error(error) => {
                debug!(backend = %backend, error = %error, "client error");
                StoreEvent::Error {
                    backend: backend.clone(),
                    error,
                }
            }
        };
        // No subscribers is fine
        let _ = store.send(event);
    }
}
