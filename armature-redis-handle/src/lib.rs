//! # Armature Redis Handle
//!
//! One Redis connection with an observable lifecycle, used as a replica
//! backend by `armature-session-replica`.
//!
//! ## Features
//!
//! - **Non-blocking connect**: the handle is usable immediately and reports
//!   `Connect`, `Ready` and `Error` notifications as the connection progresses
//! - **No offline queue**: commands issued before the handle is ready fail fast
//! - **Reconnect**: a failed connect or a dropped connection is retried with
//!   exponential backoff until the handle is closed
//! - **Keepalive**: optional background pings on an idle connection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_redis_handle::{HandleEvent, RedisConfig, RedisHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = RedisHandle::new(RedisConfig::new("redis://localhost:6379"))?;
//!     let mut events = handle.subscribe();
//!     handle.connect(true);
//!
//!     while let Ok(event) = events.recv().await {
//!         if let HandleEvent::Ready = event {
//!             break;
//!         }
//!     }
//!
//!     handle.set("session:abc", b"{}", Some(3600)).await?;
//!     handle.close();
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod handle;

pub use config::{MAX_RECONNECT_DELAY, RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use handle::{ConnectionState, HandleEvent, RedisHandle};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use armature_redis_handle::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::handle::{ConnectionState, HandleEvent, RedisHandle};
}
