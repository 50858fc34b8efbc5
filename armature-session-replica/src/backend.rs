//! Backend connection interface consumed by the replicated store.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Connectivity state of one backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Not connected
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Connected, not yet accepting commands
    Connected,
    /// Accepting commands
    Ready,
    /// Closed for good
    Closed,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle notification from one backend connection.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Connection established
    Connect,
    /// Ready to accept commands
    Ready,
    /// Connection-level failure not tied to a caller's command
    Error(BackendError),
}

/// One independent key-value connection among the configured replicas.
///
/// The connection manages its own lifecycle; the store only observes it
/// through [`SessionBackend::state`] and [`SessionBackend::events`].
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Name identifying this backend in errors and notifications.
    fn name(&self) -> &str;

    /// Current connectivity state.
    fn state(&self) -> BackendState;

    /// Stream of lifecycle notifications, subscribed before [`SessionBackend::start`].
    fn events(&self) -> BoxStream<'static, BackendEvent> {
        futures::stream::empty().boxed()
    }

    /// Begin connecting. `keepalive` allows the connection to run background
    /// work of its own for as long as it is open.
    fn start(self: Arc<Self>, keepalive: bool) {
        let _ = keepalive;
    }

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl_secs` if given.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> BackendResult<()>;

    /// Delete `key`.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Set the expiration of `key`.
    async fn expire(&self, key: &str, ttl_secs: u64) -> BackendResult<()>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> BackendResult<Vec<String>>;

    /// Delete every key matching a glob pattern.
    async fn wipe(&self, pattern: &str) -> BackendResult<()>;

    /// Request disconnection. Calls issued afterwards fail.
    fn close(&self);
}

impl fmt::Debug for dyn SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBackend")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Shared handle to a backend.
pub type BackendHandle = Arc<dyn SessionBackend>;
