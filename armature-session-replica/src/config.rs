//! Replicated session store configuration.

use crate::error::{StoreError, StoreResult};
use crate::ttl::TtlPolicy;
use serde::{Deserialize, Serialize};

#[cfg(feature = "redis")]
use armature_redis_handle::RedisConfig;

/// Characters with meaning in key glob patterns.
const GLOB_CHARS: &[char] = &['*', '?', '[', ']', '\\'];

/// Replicated session store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix for session keys; sessions are stored as `{prefix}:{sid}`
    pub key_prefix: String,
    /// Expiration policy
    pub ttl: TtlPolicy,
    /// Let backend connections skip background work of their own (keepalive pings)
    pub defer_keepalive: bool,
    /// Redis replicas, one connection each
    #[cfg(feature = "redis")]
    pub backends: Vec<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "session".to_string(),
            ttl: TtlPolicy::Derive,
            defer_keepalive: false,
            #[cfg(feature = "redis")]
            backends: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Create a builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Parse a JSON configuration document.
    ///
    /// # Examples
    ///
    /// ```
    /// use armature_session_replica::{StoreConfig, TtlPolicy};
    ///
    /// let config = StoreConfig::from_json(r#"{"key_prefix": "app", "ttl": false}"#).unwrap();
    /// assert_eq!(config.ttl, TtlPolicy::Disabled);
    ///
    /// assert!(StoreConfig::from_json(r#"{"ttl": true}"#).is_err());
    /// ```
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// - `SESSION_KEY_PREFIX`
    /// - `SESSION_TTL` (`derive`, `false`, or seconds)
    /// - `SESSION_DEFER_KEEPALIVE`
    /// - `SESSION_BACKENDS` (comma-separated Redis URLs)
    pub fn from_env() -> StoreResult<Self> {
        let mut builder = StoreConfigBuilder::new();

        if let Ok(prefix) = std::env::var("SESSION_KEY_PREFIX") {
            builder = builder.key_prefix(prefix);
        }

        if let Ok(ttl) = std::env::var("SESSION_TTL") {
            builder = builder.ttl(TtlPolicy::parse(&ttl)?);
        }

        if let Ok(defer) = std::env::var("SESSION_DEFER_KEEPALIVE") {
            builder = builder.defer_keepalive(defer == "1" || defer.eq_ignore_ascii_case("true"));
        }

        #[cfg(feature = "redis")]
        if let Ok(urls) = std::env::var("SESSION_BACKENDS") {
            for url in urls.split(',').map(str::trim).filter(|url| !url.is_empty()) {
                builder = builder.backend(RedisConfig::new(url));
            }
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the store cannot work with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.key_prefix.contains(GLOB_CHARS) {
            return Err(StoreError::Config(format!(
                "key prefix {:?} must not contain glob characters",
                self.key_prefix
            )));
        }

        #[cfg(feature = "redis")]
        for backend in &self.backends {
            backend
                .validate()
                .map_err(|e| StoreError::Config(e.to_string()))?;
        }

        Ok(())
    }

    /// Build the stored key for a session ID.
    pub fn session_key(&self, sid: &str) -> String {
        format!("{}:{}", self.key_prefix, sid)
    }

    /// Pattern matching every session key of this store.
    pub fn key_pattern(&self) -> String {
        format!("{}:*", self.key_prefix)
    }
}

/// Builder for [`StoreConfig`].
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    /// Set the session key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Set the TTL policy.
    pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set whether backend connections skip keepalive work.
    pub fn defer_keepalive(mut self, defer: bool) -> Self {
        self.config.defer_keepalive = defer;
        self
    }

    /// Add a Redis replica.
    #[cfg(feature = "redis")]
    pub fn backend(mut self, backend: RedisConfig) -> Self {
        self.config.backends.push(backend);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> StoreConfig {
        self.config
    }
}
