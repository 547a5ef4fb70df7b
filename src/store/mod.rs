//! Token cache backends.
//!
//! A [`TokenStore`] is the cache-of-record for token pairs. The three
//! backends behave identically from the caller's view:
//!
//! | Backend | Type | Config |
//! |---------|------|--------|
//! | in-process map | [`MemoryTokenStore`] | `backend: memory` |
//! | Redis | [`RedisTokenStore`] | `backend: redis` |
//! | Memcached | [`MemcachedTokenStore`] | `backend: memcached` |
//!
//! Store operations never fail from the caller's view. A remote backend that
//! cannot be reached logs a warning and behaves like an empty cache, so the
//! worst outcome of a cache outage is an extra login.

mod memcached;
mod memory;
mod redis;

pub use self::memcached::MemcachedTokenStore;
pub use self::memory::MemoryTokenStore;
pub use self::redis::RedisTokenStore;

use crate::{token::CacheKey, Result, TokenPair};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Key/value cache for token pairs with per-entry expiry.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the pair stored under `key`, or `None` on a miss, expiry or
    /// backend failure.
    async fn get(&self, key: &CacheKey) -> Option<TokenPair>;

    /// Stores `pair` under `key` for `ttl`.
    async fn set(&self, key: &CacheKey, pair: &TokenPair, ttl: Duration);

    /// Removes the pair stored under `key`.
    async fn invalidate(&self, key: &CacheKey);
}

const DEFAULT_KEY_PREFIX: &str = "service-client";
const DEFAULT_OP_TIMEOUT_MS: u64 = 500;

/// Selects and parameterizes a token store backend.
///
/// # Examples
///
/// ```
/// use service_client::TokenStoreConfig;
///
/// let config: TokenStoreConfig = serde_json::from_str(
///     r#"{"backend": "redis", "url": "redis://127.0.0.1:6379/3"}"#,
/// ).unwrap();
/// assert!(matches!(config, TokenStoreConfig::Redis { .. }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TokenStoreConfig {
    /// Process-local map. Tokens are not shared with other processes.
    #[default]
    Memory,

    /// Redis, addressed by a `redis://` URL (the DB index goes in the path).
    Redis {
        /// Connection URL
        url: String,
        /// Prefix prepended to every cache key
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Upper bound for a single cache operation, including connecting
        #[serde(default = "default_op_timeout_ms")]
        op_timeout_ms: u64,
    },

    /// Memcached, addressed by a `memcache://` URL.
    Memcached {
        /// Connection URL
        url: String,
        /// Prefix prepended to every cache key
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Upper bound for a single cache operation, including connecting
        #[serde(default = "default_op_timeout_ms")]
        op_timeout_ms: u64,
    },
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_op_timeout_ms() -> u64 {
    DEFAULT_OP_TIMEOUT_MS
}

impl TokenStoreConfig {
    /// Builds the configured backend.
    ///
    /// Remote backends connect lazily on first use, so building never
    /// performs network I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend URL is malformed.
    pub fn build(&self) -> Result<Arc<dyn TokenStore>> {
        let store: Arc<dyn TokenStore> = match self {
            TokenStoreConfig::Memory => Arc::new(MemoryTokenStore::new()),
            TokenStoreConfig::Redis {
                url,
                key_prefix,
                op_timeout_ms,
            } => Arc::new(
                RedisTokenStore::new(url)?
                    .with_key_prefix(key_prefix.clone())
                    .with_op_timeout(Duration::from_millis(*op_timeout_ms)),
            ),
            TokenStoreConfig::Memcached {
                url,
                key_prefix,
                op_timeout_ms,
            } => Arc::new(
                MemcachedTokenStore::new(url)?
                    .with_key_prefix(key_prefix.clone())
                    .with_op_timeout(Duration::from_millis(*op_timeout_ms)),
            ),
        };
        Ok(store)
    }
}

fn prefixed_key(prefix: &str, key: &CacheKey) -> String {
    if prefix.is_empty() {
        key.as_str().to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

fn encode_pair(pair: &TokenPair) -> Option<String> {
    serde_json::to_string(pair)
        .map_err(|e| tracing::warn!(error = %e, "Failed to encode token pair for cache"))
        .ok()
}

fn decode_pair(key: &str, raw: &str) -> Option<TokenPair> {
    serde_json::from_str(raw)
        .map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Discarding undecodable cached token pair")
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_optional_fields() {
        let config: TokenStoreConfig =
            serde_json::from_str(r#"{"backend": "memcached", "url": "memcache://127.0.0.1:11211"}"#)
                .unwrap();

        assert_eq!(
            config,
            TokenStoreConfig::Memcached {
                url: "memcache://127.0.0.1:11211".to_string(),
                key_prefix: "service-client".to_string(),
                op_timeout_ms: 500,
            }
        );
    }

    #[test]
    fn default_config_is_memory() {
        assert_eq!(TokenStoreConfig::default(), TokenStoreConfig::Memory);
        assert!(TokenStoreConfig::Memory.build().is_ok());
    }

    #[test]
    fn malformed_urls_fail_to_build() {
        let redis = TokenStoreConfig::Redis {
            url: "not a url".to_string(),
            key_prefix: String::new(),
            op_timeout_ms: 100,
        };
        assert!(redis.build().is_err());

        let memcached = TokenStoreConfig::Memcached {
            url: "http://127.0.0.1:11211".to_string(),
            key_prefix: String::new(),
            op_timeout_ms: 100,
        };
        assert!(memcached.build().is_err());
    }

    #[test]
    fn prefix_is_optional() {
        let key = CacheKey::new("orders", "svc");
        assert_eq!(prefixed_key("", &key), "tokens:orders:svc");
        assert_eq!(prefixed_key("prod", &key), "prod:tokens:orders:svc");
    }
}
