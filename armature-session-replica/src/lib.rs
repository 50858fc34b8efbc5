//! Replicated session storage for Armature framework.
//!
//! Stores every session on a set of independent key-value backends so that
//! losing one backend does not lose the sessions it held.
//!
//! # How operations combine
//!
//! Each operation is sent to every backend concurrently. How the individual
//! results become one outcome depends on the operation:
//!
//! | Operation | Outcome |
//! |-----------|---------|
//! | `get` | first backend returning the session wins; not found only when none has it |
//! | `set`, `destroy`, `touch`, `clear` | succeeds only if every backend succeeds |
//! | `length` | distinct session keys across every backend that answered |
//!
//! The backends are not kept consistent with each other. A failed write may
//! leave some replicas updated and others stale; the caller sees the error.
//!
//! # Expiration
//!
//! With [`TtlPolicy::Derive`] (the default) the TTL follows the session
//! cookie's `maxAge`, falling back to one day. [`TtlPolicy::Fixed`] and
//! [`TtlPolicy::Disabled`] override it for every session.
//!
//! # Features
//!
//! - `redis` - Redis replicas through `armature-redis-handle` (enabled by default)
//!
//! # Examples
//!
//! ```no_run
//! use armature_session_replica::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StoreError> {
//!     let store: ReplicatedSessionStore = ReplicatedSessionStore::redis(StoreConfig::from_env()?)?;
//!
//!     let mut events = store.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}: {:?}", event.backend(), event);
//!         }
//!     });
//!     store.start();
//!
//!     let mut session = Session::new(SessionCookie::with_max_age(60_000));
//!     session.set("username", "alice")?;
//!     store.set("sid-1", &session).await?;
//!
//!     println!("{} sessions", store.length().await?);
//!     store.destroy("sid-1").await?;
//!     store.close();
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fanout;
pub mod serializer;
pub mod store;
pub mod traits;
pub mod ttl;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use backend::{BackendEvent, BackendHandle, BackendState, SessionBackend};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{BackendError, BackendResult, StoreError, StoreResult};
pub use serializer::{JsonSerializer, SessionSerializer};
pub use store::{BackendHealth, ReplicatedSessionStore, StoreEvent};
pub use traits::{Session, SessionCookie, SessionRecord, SessionStore, SessionStoreExt};
pub use ttl::{DEFAULT_TTL_SECS, Ttl, TtlPolicy};

#[cfg(feature = "redis")]
pub use armature_redis_handle::{RedisConfig, RedisHandle};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{BackendEvent, BackendState, SessionBackend};
    pub use crate::config::StoreConfig;
    pub use crate::error::{BackendError, StoreError, StoreResult};
    pub use crate::store::{ReplicatedSessionStore, StoreEvent};
    pub use crate::traits::{Session, SessionCookie, SessionRecord, SessionStore, SessionStoreExt};
    pub use crate::ttl::TtlPolicy;

    #[cfg(feature = "redis")]
    pub use armature_redis_handle::RedisConfig;
}
